// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

use certsplit::{logging, termination_signal, Config, Controller, Error, Outcome, Paths, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "certsplit")]
#[command(about = "Split an ACME certificate store into separate .key and .crt files")]
#[command(version)]
#[command(after_help = "\
EXAMPLES:
    certsplit --domain example.com --user-folder /var/lib/acme
    certsplit --domain example.com --user-folder /var/lib/acme --daemon
    certsplit --bundle /etc/acme/example.com --daemon

The combined store is read from <user-folder>/<domain>/<domain>; the
derived files are written next to it as <domain>.key and <domain>.crt.")]
struct Cli {
    /// Domain the certificate was issued for
    #[arg(long, required_unless_present = "bundle", requires = "user_folder")]
    domain: Option<String>,

    /// Folder holding the per-domain certificate store directory
    #[arg(long, required_unless_present = "bundle", requires = "domain")]
    user_folder: Option<PathBuf>,

    /// Watch this combined key + certificate file directly
    #[arg(long, conflicts_with_all = ["domain", "user_folder"])]
    bundle: Option<PathBuf>,

    /// Keep running and re-split whenever the store changes
    #[arg(long)]
    daemon: bool,

    /// Configuration file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// How often to check whether the store exists yet, in milliseconds
    #[arg(long)]
    poll_interval_ms: Option<u64>,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    /// Show detailed output
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,
}

fn main() {
    // Reset SIGPIPE to default behavior (exit) instead of panic
    #[cfg(unix)]
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);
    }

    match run() {
        Ok(outcome) => {
            info!(?outcome, "exiting");
        }
        Err(e) => {
            error!(error = %e, "fatal");
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

fn run() -> Result<Outcome> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if cli.daemon {
        config.daemon = true;
    }
    if let Some(ms) = cli.poll_interval_ms {
        config.poll_interval_ms = ms;
        config.validate()?;
    }

    let level =
        logging::level_from_flags(cli.quiet, cli.verbose).unwrap_or(config.log_level.as_str());
    logging::init(level)?;

    let paths = match (&cli.bundle, &cli.domain, &cli.user_folder) {
        (Some(bundle), _, _) => Paths::for_bundle(bundle)?,
        (None, Some(domain), Some(root)) => {
            let paths = Paths::new(root, domain)?;
            paths.ensure_dir()?;
            paths
        }
        _ => {
            return Err(Error::Config(
                "either --bundle or both --domain and --user-folder are required".into(),
            ))
        }
    };
    info!(
        store = %paths.bundle.display(),
        key = %paths.key.display(),
        cert = %paths.cert.display(),
        "using certificate store"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| Error::Task(format!("failed to start runtime: {}", e)))?;

    runtime.block_on(async {
        let shutdown = termination_signal()?;
        Controller::new(paths, &config).run(shutdown).await
    })
}
