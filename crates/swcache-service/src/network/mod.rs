//! Access to the network: the [`Fetch`] seam used by the strategies and lifecycle, and its
//! `reqwest` implementation [`HttpFetcher`].

use std::error::Error;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::Config;
use crate::types::{Request, Response};

mod http;

pub use self::http::{HttpFetcher, create_client};

/// The user agent sent with every fetch.
pub const USER_AGENT: &str = concat!("swcache/", env!("CARGO_PKG_VERSION"));

/// How intermediate HTTP caches should treat a fetch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FetchMode {
    /// A regular fetch.
    #[default]
    Default,
    /// Bypass any intermediate cache and go to the origin.
    NoStore,
}

/// A fetch that did not produce any response.
///
/// HTTP error statuses are *not* network errors: a `404` or `500` response is a successful
/// fetch as far as the strategies are concerned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NetworkError {
    #[error("fetch timed out")]
    Timeout,
    #[error("failed to connect: {0}")]
    Connect(String),
    #[error("fetch failed: {0}")]
    Other(String),
}

impl NetworkError {
    fn root_cause(mut error: &dyn Error) -> String {
        while let Some(src) = error.source() {
            error = src;
        }

        let mut error_string = error.to_string();

        // Special-case a few error strings
        if error_string.contains("certificate verify failed") {
            error_string = "certificate verify failed".to_string();
        }

        if error_string.contains("SSL routines") {
            error_string = "SSL error".to_string();
        }

        error_string
    }
}

impl From<reqwest::Error> for NetworkError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout
        } else if error.is_connect() {
            Self::Connect(Self::root_cause(&error))
        } else {
            Self::Other(Self::root_cause(&error))
        }
    }
}

/// Performs network fetches on behalf of the strategies and the install step.
#[async_trait]
pub trait Fetch: fmt::Debug + Send + Sync {
    async fn fetch(&self, request: &Request, mode: FetchMode) -> Result<Response, NetworkError>;
}

/// Timeouts applied to every fetch.
#[derive(Copy, Clone, Debug)]
pub struct FetchTimeouts {
    /// The timeout for establishing a connection.
    pub connect: Duration,
    /// Global timeout for one fetch, including reading the body.
    pub fetch: Duration,
}

impl FetchTimeouts {
    pub fn from_config(config: &Config) -> Self {
        Self {
            connect: config.connect_timeout,
            fetch: config.fetch_timeout,
        }
    }
}

impl Default for FetchTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(2),
            fetch: Duration::from_secs(30),
        }
    }
}
