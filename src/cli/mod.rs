// CLI module - command line interface and argument parsing

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::output::OutputMode;

#[derive(Parser, Debug, Clone)]
#[command(name = "ctrecon")]
#[command(version)]
#[command(about = "Passive subdomain and certificate recon over Certificate Transparency logs")]
#[command(after_help = "\
Examples:
  ctrecon --list-logs                              List available CT logs
  ctrecon -d example.com -n 10000                  Scrape 10k entries, filter for example.com
  ctrecon -u <log-url> -d example.com              Scrape one specific log
  ctrecon -u <log-url> --from-end -n 5000 --json   Last 5k entries as JSONL
  ctrecon -d example.com --silent | httpx          Pipeline results downstream
  echo example.com | ctrecon --silent              Domain filter from stdin
  ctrecon -m -d example.com -u <log-url>           Monitor a log for new certificates
  ctrecon -u <log-url> -d example.com --resume     Resume an interrupted scrape")]
pub struct Args {
    /// Target domain(s) to filter (comma-separated, can be repeated)
    #[arg(short = 'd', long = "domain", value_name = "DOMAIN", value_delimiter = ',')]
    pub domain: Vec<String>,

    /// File containing target domains (one per line)
    #[arg(long = "domain-file", value_name = "FILE")]
    pub domain_file: Option<PathBuf>,

    /// CT log URL(s) to scrape (comma-separated, can be repeated)
    #[arg(short = 'u', long = "log-url", value_name = "URL", value_delimiter = ',')]
    pub log_url: Vec<String>,

    /// List available CT logs and exit
    #[arg(short = 'l', long = "list-logs")]
    pub list_logs: bool,

    /// Filter auto-discovered logs by state
    #[arg(long = "log-state", value_enum, default_value_t = LogStateFilter::Usable)]
    pub log_state: LogStateFilter,

    /// Concurrent fetch workers (ceiling for the adaptive ramp-up)
    #[arg(short = 'w', long = "workers", default_value_t = 4,
          value_parser = clap::value_parser!(u32).range(1..=128))]
    pub workers: u32,

    /// Concurrent parse workers (0 = number of CPUs)
    #[arg(long = "parse-workers", default_value_t = 0,
          value_parser = clap::value_parser!(u32).range(0..=128))]
    pub parse_workers: u32,

    /// Entries per batch request
    #[arg(short = 'b', long = "batch-size", default_value_t = 256,
          value_parser = clap::value_parser!(u64).range(1..=10_000))]
    pub batch_size: u64,

    /// Max requests per second across all workers (0 = unlimited)
    #[arg(long = "rate-limit", default_value_t = 0,
          value_parser = clap::value_parser!(u32).range(0..=100_000))]
    pub rate_limit: u32,

    /// HTTP request timeout in seconds
    #[arg(long = "timeout", default_value_t = 30,
          value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout: u64,

    /// Retries per failed request
    #[arg(long = "retries", default_value_t = 3,
          value_parser = clap::value_parser!(u32).range(0..=10))]
    pub retries: u32,

    /// Start entry index (-1 = auto)
    #[arg(long = "start", default_value_t = -1, allow_negative_numbers = true)]
    pub start: i64,

    /// Number of entries to fetch (0 = all)
    #[arg(short = 'n', long = "count", default_value_t = 0)]
    pub count: u64,

    /// Start from the newest entries
    #[arg(long = "from-end")]
    pub from_end: bool,

    /// Output file path (results are still mirrored to stdout)
    #[arg(short = 'o', long = "output", value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// JSON line output
    #[arg(short = 'j', long = "json")]
    pub json: bool,

    /// Output fields
    #[arg(short = 'f', long = "fields", value_enum, default_value_t = Fields::Domains)]
    pub fields: Fields,

    /// Silent mode - only output results
    #[arg(short = 's', long = "silent")]
    pub silent: bool,

    /// Verbose/debug output
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Disable color output
    #[arg(long = "no-color")]
    pub no_color: bool,

    /// Continuous monitoring mode - watch logs for new entries
    #[arg(short = 'm', long = "monitor")]
    pub monitor: bool,

    /// Seconds between STH polls in monitor mode
    #[arg(long = "poll-interval", default_value_t = 10,
          value_parser = clap::value_parser!(u64).range(1..))]
    pub poll_interval: u64,

    /// Resume from the last saved position
    #[arg(long = "resume")]
    pub resume: bool,

    /// Directory for resume state files
    #[arg(long = "state-dir", value_name = "DIR")]
    pub state_dir: Option<PathBuf>,

    /// Disable the startup check for a newer release
    #[arg(long = "disable-update-check")]
    pub disable_update_check: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fields {
    Domains,
    Ips,
    Emails,
    Certs,
    All,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStateFilter {
    Usable,
    Readonly,
    Qualified,
    Retired,
    All,
}

impl LogStateFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStateFilter::Usable => "usable",
            LogStateFilter::Readonly => "readonly",
            LogStateFilter::Qualified => "qualified",
            LogStateFilter::Retired => "retired",
            LogStateFilter::All => "all",
        }
    }
}

impl Args {
    /// Resolve the writer mode; `--json` wins over `--fields`.
    pub fn output_mode(&self) -> OutputMode {
        if self.json {
            return OutputMode::Json;
        }
        match self.fields {
            Fields::Domains => OutputMode::Domains,
            Fields::Ips => OutputMode::Ips,
            Fields::Emails => OutputMode::Emails,
            Fields::Certs => OutputMode::Certs,
            Fields::All => OutputMode::All,
        }
    }

    pub fn state_dir(&self) -> PathBuf {
        self.state_dir.clone().unwrap_or_else(default_state_dir)
    }
}

fn default_state_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".ctrecon"))
        .unwrap_or_else(|| PathBuf::from(".ctrecon"))
}
