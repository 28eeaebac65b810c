use std::env;

use swcache_service::config::{Config, LogFormat};
use swcache_service::logging::{init_json_logging, sentry_layer};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::prelude::*;

/// The filter used unless `RUST_LOG` is set.
///
/// Our own crates log at the configured `level`, dependencies never below `warn`.
fn default_filter(level: LevelFilter) -> String {
    if level == LevelFilter::OFF {
        return "off".into();
    }
    let dependencies = level.min(LevelFilter::WARN);
    format!("{dependencies},swcache={level},swcache_service={level}")
}

/// Installs the global subscriber for `config.logging`, forwarding errors to sentry.
///
/// With `enable_backtraces`, `RUST_BACKTRACE` is forced on.
///
/// # Safety
/// This modifies the environment with [`std::env::set_var`], so no other threads may be
/// running yet.
pub unsafe fn init_logging(config: &Config) {
    let logging = &config.logging;
    if logging.enable_backtraces {
        // SAFETY: Upheld by the caller.
        unsafe { env::set_var("RUST_BACKTRACE", "1") };
    }
    let filter = env::var("RUST_LOG").unwrap_or_else(|_| default_filter(logging.level));

    let pretty = match logging.format {
        LogFormat::Json => return init_json_logging(&filter, std::io::stdout),
        LogFormat::Pretty => true,
        LogFormat::Simplified => false,
        LogFormat::Auto => console::user_attended(),
    };
    let layer = tracing_subscriber::fmt::layer().with_timer(UtcTime::rfc_3339());
    let layer = if pretty {
        layer.pretty().boxed()
    } else {
        layer.compact().with_ansi(false).boxed()
    };

    tracing_subscriber::registry()
        .with(layer.with_filter(EnvFilter::new(filter)))
        .with(sentry_layer())
        .init();
}

/// Reports a fatal error, on `stderr` if logging is not up yet.
pub fn ensure_log_error(error: &anyhow::Error) {
    if LevelFilter::current() >= LevelFilter::ERROR {
        tracing::error!("{error:?}");
    } else {
        eprintln!("{error:?}");
    }
}
