//! Fetching over HTTP with `reqwest`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, redirect};
use url::{Position, Url};

use crate::config::Config;
use crate::types::{Request, Response};

use super::{Fetch, FetchMode, FetchTimeouts, NetworkError, USER_AGENT};

/// Headers that describe a single connection and must not be forwarded or stored.
const HOP_BY_HOP: &[HeaderName] = &[
    header::CONNECTION,
    header::CONTENT_LENGTH,
    header::HOST,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Creates a [`reqwest::Client`] with the provided timeouts.
pub fn create_client(timeouts: &FetchTimeouts) -> reqwest::Result<Client> {
    reqwest::ClientBuilder::new()
        .gzip(true)
        .hickory_dns(true)
        .user_agent(USER_AGENT)
        .connect_timeout(timeouts.connect)
        .timeout(timeouts.fetch)
        .pool_idle_timeout(Duration::from_secs(30))
        .redirect(redirect::Policy::limited(10))
        .build()
}

/// [`Fetch`] implementation performing real HTTP requests.
///
/// When an upstream is configured, requests to the worker's own origin are sent there instead,
/// keeping path and query. This lets the worker sit in front of the server actually hosting
/// the application.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    scope: Url,
    upstream: Option<Url>,
}

impl HttpFetcher {
    pub fn new(client: Client, scope: Url, upstream: Option<Url>) -> Self {
        Self {
            client,
            scope,
            upstream,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, NetworkError> {
        let client = create_client(&FetchTimeouts::from_config(config))?;
        Ok(Self::new(
            client,
            config.worker.scope.clone(),
            config.upstream.clone(),
        ))
    }

    /// The URL actually fetched for `url`.
    fn target_url(&self, url: &Url) -> Result<Url, NetworkError> {
        let mut target = match &self.upstream {
            Some(upstream) if url.origin() == self.scope.origin() => upstream
                .join(&url[Position::BeforePath..Position::AfterQuery])
                .map_err(|e| NetworkError::Other(e.to_string()))?,
            _ => url.clone(),
        };
        target.set_fragment(None);
        Ok(target)
    }
}

fn strip_hop_by_hop(mut headers: HeaderMap) -> HeaderMap {
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
    headers
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn fetch(&self, request: &Request, mode: FetchMode) -> Result<Response, NetworkError> {
        let url = self.target_url(&request.url)?;
        tracing::trace!(url = %request.url, target = %url, ?mode, "Fetching");

        let mut builder = self
            .client
            .request(request.method.clone(), url)
            .headers(strip_hop_by_hop(request.headers.clone()));
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }
        if mode == FetchMode::NoStore {
            builder = builder
                .header(header::CACHE_CONTROL, HeaderValue::from_static("no-store"))
                .header(header::PRAGMA, HeaderValue::from_static("no-cache"));
        }

        let response = builder.send().await.map_err(|e| {
            let e = NetworkError::from(e);
            tracing::debug!(url = %request.url, error = %e, "Fetch failed");
            e
        })?;

        let status = response.status();
        let headers = strip_hop_by_hop(response.headers().clone());
        let body = response.bytes().await?;

        metric!(counter("network.fetch") += 1, "status" => status.as_str());
        Ok(Response::new(status, headers, body))
    }
}
