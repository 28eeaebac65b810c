//! Exposes the command line application.
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use swcache_service::config::Config;
use swcache_service::metrics;

use crate::{cache, healthcheck, logging, server};

/// swcache commands.
#[derive(Subcommand)]
enum Command {
    /// Run the web server.
    Run,

    /// Install and activate the configured generation, then exit.
    Install,

    /// Delete all storage regions not belonging to the configured generation.
    Cleanup {
        /// Only list the regions that would be deleted.
        #[arg(long)]
        dry_run: bool,
    },

    /// List the storage regions and the active generation.
    Regions,

    /// Check the health of a running server.
    Healthcheck {
        /// Address of the server, defaults to the configured bind address.
        #[arg(long)]
        addr: Option<SocketAddr>,

        /// Timeout in seconds.
        #[arg(long, default_value_t = 5)]
        timeout: u64,
    },
}

/// Command line interface parser.
#[derive(Parser)]
#[command(bin_name = "swcache", version)]
struct Cli {
    /// Path to your configuration file.
    #[arg(long, short, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    /// Returns the path to the configuration file.
    fn config(&self) -> Option<&Path> {
        self.config.as_deref()
    }
}

/// Runs the main application.
pub fn execute() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::get(cli.config()).context("failed loading config")?;

    let _sentry = sentry::init(sentry::ClientOptions {
        dsn: config.sentry_dsn.clone(),
        release: Some(concat!("swcache@", env!("CARGO_PKG_VERSION")).into()),
        ..Default::default()
    });

    // SAFETY: No threads have been spawned yet.
    unsafe { logging::init_logging(&config) };

    if let Some(ref statsd) = config.metrics.statsd {
        let mut tags = config.metrics.custom_tags.clone();
        if let Some(tag) = config.metrics.hostname_tag.clone() {
            match hostname::get().map(|name| name.into_string()) {
                Ok(Ok(name)) => {
                    tags.insert(tag, name);
                }
                _ => tracing::warn!("Failed to determine the hostname for metrics"),
            }
        }
        metrics::configure_statsd(&config.metrics.prefix, statsd, tags)
            .context("failed to configure statsd")?;
    }

    match cli.command {
        Command::Run => server::run(config).context("failed to start the server")?,
        Command::Install => cache::install(config).context("failed to install")?,
        Command::Cleanup { dry_run } => {
            cache::cleanup(config, dry_run).context("failed to clean up regions")?
        }
        Command::Regions => cache::regions(config).context("failed to list regions")?,
        Command::Healthcheck { addr, timeout } => healthcheck::healthcheck(config, addr, timeout)?,
    }

    Ok(())
}
