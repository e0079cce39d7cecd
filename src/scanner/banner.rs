// Startup banner, written to stderr

use colored::Colorize;

const BANNER: &str = r#"
       _
   ___| |_ _ __ ___  ___ ___  _ __
  / __| __| '__/ _ \/ __/ _ \| '_ \
 | (__| |_| | |  __/ (_| (_) | | | |
  \___|\__|_|  \___|\___\___/|_| |_|
"#;

pub fn show_banner() {
    eprintln!("{}", BANNER.cyan());
    eprintln!(
        "\tv{} - Certificate Transparency recon\n",
        env!("CARGO_PKG_VERSION")
    );
}
