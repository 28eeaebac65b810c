//! The caching strategies, and the [`Dispatcher`] executing them.
//!
//! Every strategy produces a response. Network failures are recovered locally into a cache
//! hit, the offline page or an empty `504`, and writes into the storage regions are
//! best-effort: a failed write is logged and otherwise ignored.

use std::error::Error;
use std::sync::Arc;

use tokio::sync::oneshot;
use tokio_util::task::TaskTracker;
use tracing::Instrument;
use url::Url;

use crate::caching::{CacheStorage, CacheWriteError, RegionName};
use crate::classify::classify;
use crate::lifecycle::Generation;
use crate::network::{Fetch, FetchMode};
use crate::types::{Request, Response};

/// How a request is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// Fetch bypassing intermediate caches, fall back to any region, then to the offline page.
    NetworkFirst,
    /// Answer from any region while refreshing the runtime region in the background.
    StaleWhileRevalidate,
    /// Answer from any region, fetching and storing only on a miss.
    CacheFirst,
    /// Fetch, falling back to any region, then to an empty `504`.
    NetworkWithCacheFallback,
}

impl Strategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::NetworkFirst => "network_first",
            Strategy::StaleWhileRevalidate => "stale_while_revalidate",
            Strategy::CacheFirst => "cache_first",
            Strategy::NetworkWithCacheFallback => "network_with_cache_fallback",
        }
    }
}

/// Logs and drops the outcome of a best-effort cache write.
fn discard_write_error(url: &Url, result: Result<(), CacheWriteError>) {
    if let Err(error) = result {
        metric!(counter("caches.write_failed") += 1);
        tracing::debug!(
            %url,
            error = &error as &dyn Error,
            "Failed to store response"
        );
    }
}

/// Classifies requests and answers them with the matching [`Strategy`].
#[derive(Debug, Clone)]
pub struct Dispatcher {
    storage: CacheStorage,
    fetcher: Arc<dyn Fetch>,
    tasks: TaskTracker,
}

impl Dispatcher {
    pub fn new(storage: CacheStorage, fetcher: Arc<dyn Fetch>) -> Self {
        Self {
            storage,
            fetcher,
            tasks: TaskTracker::new(),
        }
    }

    pub fn storage(&self) -> &CacheStorage {
        &self.storage
    }

    pub fn fetcher(&self) -> &dyn Fetch {
        self.fetcher.as_ref()
    }

    /// Answers `request` on behalf of `generation`.
    #[tracing::instrument(
        skip_all,
        fields(method = %request.method, url = %request.url, class = tracing::field::Empty)
    )]
    pub async fn handle(&self, generation: &Generation, request: Request) -> Response {
        let class = classify(&request, generation.scope());
        tracing::Span::current().record("class", class.as_str());
        metric!(counter("requests.class") += 1, "class" => class.as_str());

        let strategy = class.strategy();
        tracing::trace!(strategy = strategy.as_str(), "Classified request");

        match strategy {
            Strategy::NetworkFirst => self.network_first(generation, request).await,
            Strategy::StaleWhileRevalidate => {
                self.stale_while_revalidate(generation, request).await
            }
            Strategy::CacheFirst => self.cache_first(generation, request).await,
            Strategy::NetworkWithCacheFallback => {
                self.network_with_cache_fallback(generation, request).await
            }
        }
    }

    /// Answers `request` straight from the network, for when no generation is active.
    pub async fn passthrough(&self, request: Request) -> Response {
        match self.fetcher.fetch(&request, FetchMode::Default).await {
            Ok(response) => response,
            Err(error) => {
                tracing::debug!(url = %request.url, %error, "Network unavailable");
                Response::gateway_timeout()
            }
        }
    }

    /// Waits until all background writes and revalidations have finished.
    pub async fn settle(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }

    async fn network_first(&self, generation: &Generation, request: Request) -> Response {
        let error = match self.fetcher.fetch(&request, FetchMode::NoStore).await {
            Ok(response) => {
                self.persist_in_background(generation.runtime_region(), &request, &response);
                return response;
            }
            Err(error) => error,
        };
        tracing::debug!(%error, "Network unavailable, falling back to cache");

        if let Some(cached) = self.lookup(&request).await {
            metric!(counter("strategy.cache_hit") += 1, "strategy" => "network_first");
            return cached;
        }
        metric!(counter("strategy.offline_fallback") += 1);
        Response::offline_page()
    }

    async fn stale_while_revalidate(&self, generation: &Generation, request: Request) -> Response {
        let (looked_up, lookup_done) = oneshot::channel::<()>();
        let revalidation = {
            let this = self.clone();
            let region = generation.runtime_region().clone();
            let request = request.clone();
            self.tasks.spawn(
                async move {
                    let response = match this.fetcher.fetch(&request, FetchMode::Default).await {
                        Ok(response) => response,
                        Err(error) => {
                            tracing::debug!(%error, "Revalidation failed");
                            return None;
                        }
                    };
                    // The entry may only be replaced once the lookup has read it.
                    let _ = lookup_done.await;
                    // Best-effort: the response is handed out whether or not it was stored.
                    let stored = this.put_in_cache(&region, &request, &response).await;
                    discard_write_error(&request.url, stored);
                    Some(response)
                }
                .in_current_span(),
            )
        };

        let cached = self.lookup(&request).await;
        drop(looked_up);
        if let Some(cached) = cached {
            metric!(counter("strategy.cache_hit") += 1, "strategy" => "stale_while_revalidate");
            return cached;
        }

        match revalidation.await {
            Ok(Some(response)) => response,
            Ok(None) => Response::gateway_timeout(),
            Err(error) => {
                tracing::error!(error = &error as &dyn Error, "Revalidation task failed");
                Response::gateway_timeout()
            }
        }
    }

    async fn cache_first(&self, generation: &Generation, request: Request) -> Response {
        if let Some(cached) = self.lookup(&request).await {
            metric!(counter("strategy.cache_hit") += 1, "strategy" => "cache_first");
            return cached;
        }

        let response = match self.fetcher.fetch(&request, FetchMode::Default).await {
            Ok(response) => response,
            Err(error) => {
                tracing::debug!(%error, "Network unavailable");
                return Response::gateway_timeout();
            }
        };

        let region = if generation.scope().is_core_asset(&request.url) {
            generation.static_region()
        } else {
            generation.runtime_region()
        };
        // Best-effort: the fetched response is returned even if it could not be stored.
        let stored = self.put_in_cache(region, &request, &response).await;
        discard_write_error(&request.url, stored);

        response
    }

    async fn network_with_cache_fallback(
        &self,
        generation: &Generation,
        request: Request,
    ) -> Response {
        let error = match self.fetcher.fetch(&request, FetchMode::Default).await {
            Ok(response) => {
                self.persist_in_background(generation.runtime_region(), &request, &response);
                return response;
            }
            Err(error) => error,
        };
        tracing::debug!(%error, "Network unavailable, falling back to cache");

        match self.lookup(&request).await {
            Some(cached) => {
                metric!(counter("strategy.cache_hit") += 1, "strategy" => "network_with_cache_fallback");
                cached
            }
            None => Response::gateway_timeout(),
        }
    }

    /// Looks `request` up in every region, treating storage failures as a miss.
    async fn lookup(&self, request: &Request) -> Option<Response> {
        match self.storage.match_any(request).await {
            Ok(cached) => cached,
            Err(error) => {
                tracing::warn!(
                    error = &error as &dyn Error,
                    "Failed to enumerate storage regions"
                );
                None
            }
        }
    }

    /// Writes into a region of the current generation.
    ///
    /// Regions are only created by install, so a write for a generation whose regions have
    /// been purged in the meantime fails.
    async fn put_in_cache(
        &self,
        region: &RegionName,
        request: &Request,
        response: &Response,
    ) -> Result<(), CacheWriteError> {
        let Some(handle) = self.storage.get(region).await? else {
            return Err(CacheWriteError::RegionGone(region.to_string()));
        };
        handle.put(request, response).await
    }

    /// Stores a copy of `response` without delaying it.
    fn persist_in_background(&self, region: &RegionName, request: &Request, response: &Response) {
        let this = self.clone();
        let region = region.clone();
        let request = request.clone();
        let response = response.clone();

        self.tasks.spawn(
            async move {
                // Best-effort: the response has already been handed out.
                let stored = this.put_in_cache(&region, &request, &response).await;
                discard_write_error(&request.url, stored);
            }
            .in_current_span(),
        );
    }
}
