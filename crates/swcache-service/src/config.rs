use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use sentry::types::Dsn;
use serde::{Deserialize, Deserializer, Serialize, de};
use tracing::level_filters::LevelFilter;
use url::{Host, Url};

use crate::caching::RegionName;

/// Controls the log format
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect (pretty for tty, simplified for other)
    Auto,
    /// With colors
    Pretty,
    /// Simplified log output
    Simplified,
    /// Dump out JSON lines
    Json,
}

/// Controls the logging system.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Logging {
    /// The log level for swcache.
    #[serde(deserialize_with = "deserialize_level_filter")]
    pub level: LevelFilter,
    /// Controls the log format.
    pub format: LogFormat,
    /// When set to true, backtraces are forced on.
    pub enable_backtraces: bool,
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
            enable_backtraces: true,
        }
    }
}

/// Control the metrics.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Metrics {
    /// host/port of statsd instance
    pub statsd: Option<String>,
    /// The prefix that should be added to all metrics.
    pub prefix: String,
    /// A tag name to report the hostname to, for each metric. Defaults to not sending such a tag.
    pub hostname_tag: Option<String>,
    /// A map containing custom tags and their values.
    ///
    /// These tags will be appended to every metric.
    pub custom_tags: BTreeMap<String, String>,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            statsd: env::var("STATSD_SERVER").ok(),
            prefix: "swcache".into(),
            hostname_tag: None,
            custom_tags: BTreeMap::new(),
        }
    }
}

/// Describes one generation of the worker: what it precaches, where it stores it, and which
/// remote origins it is allowed to cache at runtime.
///
/// Bumping either region name is how a deployment retires the previous generation: on
/// activation, every region not named here is purged.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorkerConfig {
    /// The URL the worker is registered for. Its origin is the "same origin" of the classifier,
    /// and core asset paths are resolved against it.
    pub scope: Url,
    /// Region holding the precached core assets.
    pub static_region: RegionName,
    /// Region holding everything cached at runtime.
    pub runtime_region: RegionName,
    /// Relative paths that must all be cached before a generation can be activated.
    pub core_assets: Vec<String>,
    /// URL prefixes of remote origins eligible for stale-while-revalidate caching.
    pub allowlist: Vec<String>,
    /// Whether a freshly installed generation supersedes the active one right away, instead of
    /// waiting for its client views to go away.
    pub skip_waiting_on_install: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            scope: Url::parse("http://localhost:3030/").expect("valid default scope"),
            static_region: RegionName::new("turnos-static-v1").expect("valid region name"),
            runtime_region: RegionName::new("turnos-runtime-v1").expect("valid region name"),
            core_assets: vec![
                "./manifest.webmanifest".into(),
                "./icons/icon-192.png".into(),
                "./icons/icon-512.png".into(),
            ],
            allowlist: vec!["https://cdn.tailwindcss.com".into()],
            skip_waiting_on_install: true,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Which directory to use when storing the storage regions.
    ///
    /// Defaults to `/data` inside docker, and `./cache` everywhere else.
    pub cache_dir: PathBuf,

    /// Host and port to bind the HTTP webserver to.
    pub bind: String,

    /// Configuration for internal logging.
    pub logging: Logging,

    /// Configuration for reporting metrics to a statsd instance.
    pub metrics: Metrics,

    /// DSN to report internal errors to
    pub sentry_dsn: Option<Dsn>,

    /// The timeout for establishing a connection in a fetch.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// The timeout for a whole fetch, including the response body.
    #[serde(with = "humantime_serde")]
    pub fetch_timeout: Duration,

    /// The origin serving the application's own assets.
    ///
    /// When set, requests for the worker's own origin are fetched from here instead. Requests
    /// to other origins always go directly to the network.
    pub upstream: Option<Url>,

    /// The worker generation to install and activate.
    pub worker: WorkerConfig,
}

fn is_docker() -> bool {
    if fs::metadata("/.dockerenv").is_ok() {
        return true;
    }

    fs::read_to_string("/proc/self/cgroup")
        .map(|s| s.contains("/docker"))
        .unwrap_or(false)
}

fn default_bind() -> String {
    if is_docker() {
        // Docker images rely on this service being exposed
        "0.0.0.0:3030".to_owned()
    } else {
        "127.0.0.1:3030".to_owned()
    }
}

fn default_cache_dir() -> PathBuf {
    if is_docker() {
        // Docker image already defines `/data` as a persistent volume
        PathBuf::from("/data")
    } else {
        PathBuf::from("./cache")
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            cache_dir: default_cache_dir(),
            bind: default_bind(),
            logging: Logging::default(),
            metrics: Metrics::default(),
            sentry_dsn: None,
            connect_timeout: Duration::from_secs(2),
            fetch_timeout: Duration::from_secs(30),
            upstream: None,
            worker: WorkerConfig::default(),
        }
    }
}

impl Config {
    pub fn get(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_reader(
                fs::File::open(path).context("failed to open configuration file")?,
            ),
            None => {
                let config = Config::default();
                config.validate()?;
                Ok(config)
            }
        }
    }

    pub fn from_reader(mut reader: impl std::io::Read) -> Result<Self> {
        let mut config = String::new();
        reader
            .read_to_string(&mut config)
            .context("failed reading config file")?;
        // check for empty files explicitly
        if config.trim().is_empty() {
            anyhow::bail!("config file empty");
        }
        let config: Config =
            serde_yaml::from_str(&config).context("failed to parse config YAML")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let worker = &self.worker;
        if worker.static_region == worker.runtime_region {
            anyhow::bail!(
                "static and runtime region must differ, both are `{}`",
                worker.static_region
            );
        }
        if worker.scope.cannot_be_a_base() {
            anyhow::bail!("worker scope `{}` is not a base URL", worker.scope);
        }
        if self.upstream.is_none() && self.scope_is_bind_address() {
            anyhow::bail!(
                "worker scope `{}` points at this server on `{}`, set `upstream`",
                worker.scope,
                self.bind
            );
        }
        Ok(())
    }

    /// Whether requests for the scope's origin would reach our own listener.
    ///
    /// Without an `upstream`, same-origin requests are fetched from the scope itself.
    fn scope_is_bind_address(&self) -> bool {
        let Ok(bind) = self.bind.parse::<SocketAddr>() else {
            return false;
        };
        let scope = &self.worker.scope;
        if scope.port_or_known_default() != Some(bind.port()) {
            return false;
        }

        let bind_ip = bind.ip();
        let reaches_bind = |ip: IpAddr| {
            bind_ip.is_unspecified()
                || ip == bind_ip
                || (ip.is_loopback() && bind_ip.is_loopback())
        };
        match scope.host() {
            Some(Host::Domain(domain)) => {
                bind_ip.is_unspecified()
                    || (domain.eq_ignore_ascii_case("localhost") && bind_ip.is_loopback())
            }
            Some(Host::Ipv4(ip)) => reaches_bind(ip.into()),
            Some(Host::Ipv6(ip)) => reaches_bind(ip.into()),
            None => false,
        }
    }
}

#[derive(Debug)]
struct LevelFilterVisitor;

impl de::Visitor<'_> for LevelFilterVisitor {
    type Value = LevelFilter;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> std::fmt::Result {
        write!(
            formatter,
            r#"one of the strings "off", "error", "warn", "info", "debug", or "trace""#
        )
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        match v {
            "off" => Ok(LevelFilter::OFF),
            "error" => Ok(LevelFilter::ERROR),
            "warn" => Ok(LevelFilter::WARN),
            "info" => Ok(LevelFilter::INFO),
            "debug" => Ok(LevelFilter::DEBUG),
            "trace" => Ok(LevelFilter::TRACE),
            _ => Err(de::Error::unknown_variant(
                v,
                &["off", "error", "warn", "info", "debug", "trace"],
            )),
        }
    }
}

fn deserialize_level_filter<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<LevelFilter, D::Error> {
    deserializer.deserialize_str(LevelFilterVisitor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_defaults() {
        let cfg = Config::default();
        let worker = &cfg.worker;
        assert_eq!(worker.static_region, *"turnos-static-v1");
        assert_eq!(worker.runtime_region, *"turnos-runtime-v1");
        assert_eq!(
            worker.core_assets,
            [
                "./manifest.webmanifest",
                "./icons/icon-192.png",
                "./icons/icon-512.png"
            ]
        );
        assert_eq!(worker.allowlist, ["https://cdn.tailwindcss.com"]);
        assert!(worker.skip_waiting_on_install);
    }

    #[test]
    fn test_partial_worker_config() {
        // Bumping one region name keeps all other worker defaults.
        let yaml = r#"
            worker:
              static_region: turnos-static-v2
            upstream: http://127.0.0.1:8080/
        "#;
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        assert_eq!(cfg.worker.static_region, *"turnos-static-v2");
        assert_eq!(cfg.worker.runtime_region, *"turnos-runtime-v1");
        assert_eq!(cfg.worker.core_assets, WorkerConfig::default().core_assets);
    }

    #[test]
    fn test_invalid_region_names() {
        let yaml = r#"
            worker:
              runtime_region: ../../etc
        "#;
        assert!(Config::from_reader(yaml.as_bytes()).is_err());

        let yaml = r#"
            worker:
              static_region: app-v1
              runtime_region: app-v1
        "#;
        let err = Config::from_reader(yaml.as_bytes()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "static and runtime region must differ, both are `app-v1`"
        );
    }

    #[test]
    fn test_timeouts() {
        let yaml = r#"
            connect_timeout: 500ms
            fetch_timeout: 1m
            upstream: http://127.0.0.1:8080/
        "#;
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        assert_eq!(cfg.connect_timeout, Duration::from_millis(500));
        assert_eq!(cfg.fetch_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_logging_level() {
        let yaml = r#"
            logging:
              level: debug
              format: json
            upstream: http://127.0.0.1:8080/
        "#;
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        assert_eq!(cfg.logging.level, LevelFilter::DEBUG);
        assert_eq!(cfg.logging.format, LogFormat::Json);

        let yaml = r#"
            logging:
              level: verbose
        "#;
        assert!(Config::from_reader(yaml.as_bytes()).is_err());
    }

    #[test]
    fn test_unknown_fields() {
        // Unknown fields should not cause failure
        let yaml = r#"
            worker:
              not_a_setting: 1
            caches:
              downloaded: {}
            upstream: http://127.0.0.1:8080/
        "#;
        let cfg = Config::from_reader(yaml.as_bytes());
        assert!(cfg.is_ok());
    }

    #[test]
    fn test_scope_on_bind_address_needs_upstream() {
        let err = Config::get(None).unwrap_err();
        assert!(err.to_string().contains("set `upstream`"), "{err}");

        let yaml = r#"
            bind: 127.0.0.1:3030
            worker:
              scope: http://localhost:3030/app/
        "#;
        let err = Config::from_reader(yaml.as_bytes()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "worker scope `http://localhost:3030/app/` points at this server on \
             `127.0.0.1:3030`, set `upstream`"
        );

        let yaml = r#"
            bind: 0.0.0.0:80
            worker:
              scope: http://turnos.example.com/
        "#;
        assert!(Config::from_reader(yaml.as_bytes()).is_err());

        let yaml = r#"
            bind: 127.0.0.1:3030
            upstream: http://127.0.0.1:8080/
            worker:
              scope: http://localhost:3030/
        "#;
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        assert_eq!(cfg.upstream.unwrap().as_str(), "http://127.0.0.1:8080/");
    }

    #[test]
    fn test_remote_scope_without_upstream() {
        // The worker fronts an origin it does not listen on.
        let yaml = r#"
            bind: 127.0.0.1:3030
            worker:
              scope: https://turnos.example.com/
        "#;
        assert!(Config::from_reader(yaml.as_bytes()).is_ok());

        let yaml = r#"
            bind: 127.0.0.1:3030
            worker:
              scope: http://localhost:8080/
        "#;
        assert!(Config::from_reader(yaml.as_bytes()).is_ok());
    }

    #[test]
    fn test_empty_file() {
        // Empty files aren't supported
        let yaml = r#""#;
        let result = Config::from_reader(yaml.as_bytes());
        assert!(result.is_err());
    }
}
