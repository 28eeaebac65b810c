use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use sentry::integrations::tower::{NewSentryLayer, SentryHttpLayer};
use swcache_service::service::ServiceWorker;
use tower::ServiceBuilder;
use url::Url;

mod control;
mod error;
mod events;
mod fetch;
mod metrics;
mod status;

pub use error::ResponseError;
pub use status::StatusResponse;
use metrics::MetricsLayer;

use control::post_message;
use events::subscribe_events;
use fetch::fetch;
use status::get_status;

/// Shared state of all endpoints.
#[derive(Debug, Clone)]
pub struct AppState {
    worker: Arc<ServiceWorker>,
    /// Relative request targets are resolved against this URL.
    origin: Arc<Url>,
}

impl AppState {
    pub fn new(worker: Arc<ServiceWorker>, origin: Url) -> Self {
        Self {
            worker,
            origin: Arc::new(origin),
        }
    }
}

pub async fn healthcheck() -> &'static str {
    swcache_service::metric!(counter("healthcheck") += 1);
    "ok"
}

pub fn create_app(state: AppState) -> Router {
    // The layers here go "top to bottom" according to the reading order here.
    let layer = ServiceBuilder::new()
        .layer(NewSentryLayer::new_from_top())
        .layer(SentryHttpLayer::new().enable_transaction())
        .layer(MetricsLayer)
        .layer(DefaultBodyLimit::max(10 * 1024 * 1024));
    Router::new()
        .route("/_swcache/message", post(post_message))
        .route("/_swcache/events", get(subscribe_events))
        .route("/_swcache/status", get(get_status))
        .fallback(fetch)
        .with_state(state)
        .layer(layer)
        // the healthcheck is last, as it will bypass all the middlewares
        .route("/healthcheck", get(healthcheck))
}
