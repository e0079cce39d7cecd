// ctrecon - Certificate Transparency log scraper for passive recon
// Licensed under GPL-3.0
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, version 3.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.

use anyhow::Result;
use clap::Parser;
use ctrecon::{Args, Runner, Shutdown};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);
    if args.no_color {
        colored::control::set_override(false);
    }

    // SIGINT maps to the shared cancellation token; every blocking point
    // in the pipeline observes it.
    let shutdown = Shutdown::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, shutting down gracefully...");
                shutdown.cancel();
            }
        });
    }

    let runner = Runner::new(args);
    runner.run(shutdown).await?;
    Ok(())
}

/// Logging goes to stderr so results own stdout. RUST_LOG overrides the
/// flag-derived level when set.
fn init_logging(args: &Args) {
    let default_level = if args.silent {
        "error"
    } else if args.verbose {
        "debug"
    } else {
        "info"
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_ansi(!args.no_color)
        .init();
}
