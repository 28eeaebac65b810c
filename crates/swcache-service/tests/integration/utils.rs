use std::path::Path;
use std::time::Duration;

use reqwest::Url;
use swcache_service::config::Config;
use swcache_service::lifecycle::{ActivationReport, Generation};
use swcache_service::service::ServiceWorker;
use swcache_service::types::{Request, Response};
use swcache_test as test;

pub use test::{HitCounter, read_fixture};

/// The origin the worker under test is registered for.
///
/// Requests to it are answered by the upstream [`HitCounter`], so `app.test` never has to
/// resolve.
pub const SCOPE: &str = "http://app.test/";

/// Allowlisted prefix, served by the `/versioned/` route of the [`HitCounter`].
pub const ALLOWLISTED: &str = "http://app.test/versioned/";

/// Returns the configuration of a worker storing into `cache_dir` and fetching its own origin
/// from `upstream`.
pub fn config(cache_dir: &Path, upstream: Url) -> Config {
    let mut config = Config {
        cache_dir: cache_dir.to_owned(),
        upstream: Some(upstream),
        connect_timeout: Duration::from_secs(1),
        fetch_timeout: Duration::from_secs(5),
        ..Default::default()
    };
    config.worker.scope = SCOPE.parse().unwrap();
    config.worker.allowlist = vec![ALLOWLISTED.to_owned()];
    config
}

/// Builds a URL below [`SCOPE`].
pub fn url(path: &str) -> Url {
    Url::parse(SCOPE).unwrap().join(path).unwrap()
}

pub fn body(response: &Response) -> &str {
    std::str::from_utf8(&response.body).unwrap()
}

/// A worker whose own origin is served by a [`HitCounter`].
///
/// Keep the whole struct alive until the test has finished: it owns the temporary cache
/// directory and the server.
pub struct TestService {
    pub worker: ServiceWorker,
    pub server: HitCounter,
    pub config: Config,
    pub cache_dir: test::TempDir,
}

impl TestService {
    /// Installs and activates the configured generation.
    pub async fn activate(&self) -> ActivationReport {
        let generation = Generation::from_config(self.config.worker.clone()).unwrap();
        self.worker.update(generation).await.unwrap().unwrap()
    }

    /// Creates a second worker on the same cache directory that cannot reach its own origin.
    ///
    /// The generation active in the cache directory is restored, as after a restart without
    /// network.
    pub async fn offline(&self) -> ServiceWorker {
        let mut config = config(self.cache_dir.path(), test::unreachable_url());
        config.worker = self.config.worker.clone();

        let worker = ServiceWorker::from_config(&config).unwrap();
        worker.restore().await.unwrap();
        worker
    }

    pub async fn get(&self, path: &str) -> Response {
        get(&self.worker, path).await
    }

    pub async fn navigate(&self, path: &str) -> Response {
        navigate(&self.worker, path).await
    }
}

/// Setup tests and create a worker whose own origin is served by a fresh [`HitCounter`].
///
/// The `update_config` closure can modify the configuration before the worker is created.
pub fn setup_service(update_config: impl FnOnce(&mut Config)) -> TestService {
    test::setup();

    let cache_dir = test::tempdir();
    let server = HitCounter::new();

    let mut config = config(cache_dir.path(), server.url("/"));
    update_config(&mut config);

    let worker = ServiceWorker::from_config(&config).unwrap();
    TestService {
        worker,
        server,
        config,
        cache_dir,
    }
}

pub async fn get(worker: &ServiceWorker, path: &str) -> Response {
    worker.fetch(Request::get(url(path))).await
}

pub async fn navigate(worker: &ServiceWorker, path: &str) -> Response {
    worker.fetch(Request::navigate(url(path))).await
}
