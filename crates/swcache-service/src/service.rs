//! The [`ServiceWorker`]: lifecycle state plus the entry points for all events.

use std::sync::{Arc, Mutex};

use anyhow::Context;
use serde_json::Value;

use crate::caching::CacheStorage;
use crate::clients::{ClientView, Clients};
use crate::config::Config;
use crate::control::ControlMessage;
use crate::lifecycle::{
    ActivationError, ActivationReport, Generation, GenerationId, PrecacheError, load_registration,
    notify_clients, purge_stale_regions, save_registration,
};
use crate::network::{Fetch, HttpFetcher};
use crate::strategy::Dispatcher;
use crate::types::{Request, Response};

/// An event delivered to the worker.
#[derive(Debug)]
pub enum Event {
    /// Install a new generation.
    Install(Generation),
    /// Activate the waiting generation.
    Activate,
    /// Answer an intercepted request.
    Fetch(Request),
    /// A message from a client view.
    Message(Value),
}

/// The result of handling an [`Event`].
#[derive(Debug)]
pub enum EventOutcome {
    Installed(GenerationId),
    Activated(ActivationReport),
    Response(Response),
    /// The event was a control message that was not recognized, or had nothing to act on.
    Ignored,
}

/// A failed lifecycle transition.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("install failed")]
    Precache(#[from] PrecacheError),
    #[error("activation failed")]
    Activation(#[from] ActivationError),
}

#[derive(Debug, Default)]
struct Registration {
    waiting: Option<Arc<Generation>>,
    active: Option<Arc<Generation>>,
}

/// An offline-capable asset cache in front of the network.
///
/// Requests are answered by the active generation, if any, and go straight to the network
/// otherwise. Lifecycle transitions (install, activate) are serialized; request handling runs
/// concurrently with them and never waits for one.
#[derive(Debug)]
pub struct ServiceWorker {
    dispatcher: Dispatcher,
    clients: Clients,
    registration: Mutex<Registration>,
    lifecycle: tokio::sync::Mutex<()>,
}

impl ServiceWorker {
    pub fn new(storage: CacheStorage, fetcher: Arc<dyn Fetch>) -> Self {
        Self {
            dispatcher: Dispatcher::new(storage, fetcher),
            clients: Clients::new(),
            registration: Mutex::new(Registration::default()),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    /// Creates a worker storing its regions in the configured cache directory, and fetching
    /// over HTTP.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let storage =
            CacheStorage::from_config(config).context("failed to open cache directory")?;
        storage
            .clear_tmp()
            .context("failed to clear temporary files")?;
        let fetcher = HttpFetcher::from_config(config).context("failed to create HTTP client")?;

        Ok(Self::new(storage, Arc::new(fetcher)))
    }

    pub fn storage(&self) -> &CacheStorage {
        self.dispatcher.storage()
    }

    pub fn clients(&self) -> &Clients {
        &self.clients
    }

    /// The generation currently answering requests.
    pub fn active(&self) -> Option<Arc<Generation>> {
        self.registration.lock().unwrap().active.clone()
    }

    /// The installed generation waiting for activation.
    pub fn waiting(&self) -> Option<Arc<Generation>> {
        self.registration.lock().unwrap().waiting.clone()
    }

    pub async fn handle_event(&self, event: Event) -> Result<EventOutcome, LifecycleError> {
        Ok(match event {
            Event::Install(generation) => {
                EventOutcome::Installed(self.install(generation).await?.id())
            }
            Event::Activate => EventOutcome::Activated(self.activate().await?),
            Event::Fetch(request) => EventOutcome::Response(self.fetch(request).await),
            Event::Message(message) => match self.message(&message).await? {
                Some(report) => EventOutcome::Activated(report),
                None => EventOutcome::Ignored,
            },
        })
    }

    /// Makes the generation recorded in the cache directory active again, without installing.
    ///
    /// This is how a restarted worker keeps serving while the network is unreachable.
    pub async fn restore(&self) -> anyhow::Result<Option<GenerationId>> {
        let _lifecycle = self.lifecycle.lock().await;

        let Some(generation) = load_registration(self.storage().root())
            .await
            .context("failed to load the active generation")?
        else {
            return Ok(None);
        };

        let id = generation.id();
        tracing::info!(generation = %id, "Restored active generation");
        self.registration.lock().unwrap().active = Some(Arc::new(generation));
        Ok(Some(id))
    }

    /// Precaches the core assets of `generation` and makes it the waiting generation.
    ///
    /// A previously waiting generation is discarded. On failure, the registration is left
    /// unchanged.
    #[tracing::instrument(skip_all, fields(generation = %generation.id()))]
    pub async fn install(&self, generation: Generation) -> Result<Arc<Generation>, PrecacheError> {
        let _lifecycle = self.lifecycle.lock().await;
        tracing::info!(region = %generation.static_region(), "Installing generation");

        let stored = match generation
            .precache(self.storage(), self.dispatcher.fetcher())
            .await
        {
            Ok(stored) => stored,
            Err(error) => {
                tracing::error!(error = &error as &dyn std::error::Error, "Install failed");
                return Err(error);
            }
        };
        if generation.config().skip_waiting_on_install {
            generation.skip_waiting();
        }

        let generation = Arc::new(generation);
        let discarded = self
            .registration
            .lock()
            .unwrap()
            .waiting
            .replace(generation.clone());
        if let Some(discarded) = discarded {
            tracing::debug!(discarded = %discarded.id(), "Replaced waiting generation");
        }

        tracing::info!(core_assets = stored, "Installed generation");
        Ok(generation)
    }

    /// Activates the waiting generation, if it is eligible.
    ///
    /// It is eligible if it was told to skip waiting, if nothing is active yet, or if no client
    /// view is controlled by the active generation anymore.
    pub async fn activate(&self) -> Result<ActivationReport, ActivationError> {
        let _lifecycle = self.lifecycle.lock().await;
        self.activate_locked().await
    }

    /// Installs `generation` and activates it right away if it is eligible.
    ///
    /// Returns `None` if the generation was installed but has to wait.
    pub async fn update(
        &self,
        generation: Generation,
    ) -> Result<Option<ActivationReport>, LifecycleError> {
        self.install(generation).await?;
        match self.activate().await {
            Ok(report) => Ok(Some(report)),
            Err(ActivationError::NotEligible(controlled)) => {
                tracing::info!(controlled, "New generation is waiting for client views to close");
                Ok(None)
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Promotes the waiting generation right away, regardless of open client views.
    ///
    /// Does nothing if no generation is waiting.
    pub async fn skip_waiting(&self) -> Result<Option<ActivationReport>, ActivationError> {
        let _lifecycle = self.lifecycle.lock().await;

        let Some(waiting) = self.waiting() else {
            tracing::debug!("Skip waiting requested, but nothing is waiting");
            return Ok(None);
        };
        waiting.skip_waiting();
        self.activate_locked().await.map(Some)
    }

    /// Handles a message from a client view.
    ///
    /// Only `SKIP_WAITING` is acted upon; every other message is ignored.
    pub async fn message(
        &self,
        message: &Value,
    ) -> Result<Option<ActivationReport>, ActivationError> {
        match ControlMessage::parse(message) {
            Some(ControlMessage::SkipWaiting) => self.skip_waiting().await,
            Some(ControlMessage::SwActivated) | None => {
                tracing::trace!(%message, "Ignoring control message");
                Ok(None)
            }
        }
    }

    /// Answers an intercepted request. This never fails: every path yields some response.
    pub async fn fetch(&self, request: Request) -> Response {
        match self.active() {
            Some(generation) => self.dispatcher.handle(&generation, request).await,
            None => self.dispatcher.passthrough(request).await,
        }
    }

    /// Registers a new client view, controlled by the active generation.
    pub fn open_client(&self) -> ClientView {
        let controller = self.active().map(|generation| generation.id());
        self.clients.open(controller)
    }

    /// Waits until all background cache writes have finished.
    pub async fn settle(&self) {
        self.dispatcher.settle().await
    }

    fn eligible_for_activation(&self) -> Result<Arc<Generation>, ActivationError> {
        let registration = self.registration.lock().unwrap();
        let waiting = registration
            .waiting
            .clone()
            .ok_or(ActivationError::NothingWaiting)?;

        if let Some(active) = &registration.active {
            let controlled = self.clients.controlled_by(active.id());
            if !waiting.is_skip_waiting() && controlled > 0 {
                return Err(ActivationError::NotEligible(controlled));
            }
        }
        Ok(waiting)
    }

    #[tracing::instrument(skip_all)]
    async fn activate_locked(&self) -> Result<ActivationReport, ActivationError> {
        let generation = self.eligible_for_activation()?;
        let id = generation.id();
        tracing::info!(generation = %id, "Activating generation");

        let purged = purge_stale_regions(self.storage(), &generation).await?;
        if let Err(error) = save_registration(self.storage().root(), &generation).await {
            tracing::warn!(
                error = &error as &dyn std::error::Error,
                "Failed to record the active generation"
            );
        }

        {
            let mut registration = self.registration.lock().unwrap();
            registration.waiting = None;
            registration.active = Some(generation);
        }
        let claimed = self.clients.claim(id);
        let (notified, failed) = notify_clients(&self.clients, id);

        tracing::info!(
            generation = %id,
            purged = purged.len(),
            claimed,
            notified,
            "Activated generation"
        );
        Ok(ActivationReport {
            generation: id,
            purged,
            claimed,
            notified,
            failed,
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::caching::RegionName;
    use crate::config::WorkerConfig;
    use crate::network::NetworkError;
    use crate::test::{self, MockFetcher};
    use crate::types::OFFLINE_PAGE;

    use super::*;

    const ASSETS: [&str; 3] = [
        "https://app.test/manifest.webmanifest",
        "https://app.test/icons/icon-192.png",
        "https://app.test/icons/icon-512.png",
    ];

    fn online() -> Arc<MockFetcher> {
        let fetcher = MockFetcher::new();
        for asset in ASSETS {
            fetcher.respond(asset, Response::ok(asset));
        }
        fetcher.respond("https://app.test/", Response::ok("<h1>Turnos</h1>"));
        Arc::new(fetcher)
    }

    fn generation(version: u32, skip_waiting_on_install: bool) -> Generation {
        Generation::from_config(WorkerConfig {
            scope: "https://app.test/".parse().unwrap(),
            static_region: RegionName::new(format!("turnos-static-v{version}")).unwrap(),
            runtime_region: RegionName::new(format!("turnos-runtime-v{version}")).unwrap(),
            skip_waiting_on_install,
            ..Default::default()
        })
        .unwrap()
    }

    fn worker(cache_dir: &test::TempDir, fetcher: Arc<MockFetcher>) -> ServiceWorker {
        let storage = CacheStorage::new(cache_dir.path()).unwrap();
        ServiceWorker::new(storage, fetcher)
    }

    #[tokio::test]
    async fn test_first_install_activates() {
        test::setup();
        let cache_dir = test::tempdir();
        let worker = worker(&cache_dir, online());

        // views opened before any generation exists
        let mut view = worker.open_client();
        assert_eq!(view.controller(), None);

        let report = worker.update(generation(1, false)).await.unwrap().unwrap();
        assert_eq!(report.claimed, 1);
        assert_eq!(report.notified, 1);
        assert!(report.purged.is_empty());

        assert_eq!(view.controller(), Some(report.generation));
        assert_eq!(view.try_recv(), Some(ControlMessage::SwActivated));
        assert_eq!(view.try_recv(), None);
        assert!(worker.waiting().is_none());
    }

    #[tokio::test]
    async fn test_upgrade_purges_and_notifies() {
        test::setup();
        let cache_dir = test::tempdir();
        let worker = worker(&cache_dir, online());

        worker.update(generation(1, true)).await.unwrap();
        worker.fetch(Request::navigate("https://app.test/".parse().unwrap())).await;
        worker.settle().await;
        worker
            .storage()
            .open(&RegionName::new("leftover-from-v0").unwrap())
            .await
            .unwrap();

        let mut views = [worker.open_client(), worker.open_client(), worker.open_client()];
        let report = worker.update(generation(2, true)).await.unwrap().unwrap();

        let mut purged = report.purged.clone();
        purged.sort();
        assert_eq!(
            purged,
            ["leftover-from-v0", "turnos-runtime-v1", "turnos-static-v1"]
        );
        let mut regions = worker.storage().keys().await.unwrap();
        regions.sort();
        assert_eq!(regions, ["turnos-runtime-v2", "turnos-static-v2"]);

        for view in &mut views {
            assert_eq!(view.controller(), Some(report.generation));
            assert_eq!(view.try_recv(), Some(ControlMessage::SwActivated));
            assert_eq!(view.try_recv(), None);
        }
    }

    #[tokio::test]
    async fn test_failed_install_keeps_active_generation() {
        test::setup();
        let cache_dir = test::tempdir();
        let fetcher = online();
        let worker = worker(&cache_dir, fetcher.clone());

        let first = worker.update(generation(1, true)).await.unwrap().unwrap();

        fetcher.fail(ASSETS[2], NetworkError::Timeout);
        let result = worker.update(generation(2, true)).await;
        assert!(matches!(result, Err(LifecycleError::Precache(_))));

        assert!(worker.waiting().is_none());
        assert_eq!(worker.active().unwrap().id(), first.generation);
        assert!(matches!(
            worker.activate().await,
            Err(ActivationError::NothingWaiting)
        ));
        assert!(worker.storage().has("turnos-static-v1").await.unwrap());
    }

    #[tokio::test]
    async fn test_waiting_until_skip_waiting() {
        test::setup();
        let cache_dir = test::tempdir();
        let worker = worker(&cache_dir, online());

        let first = worker.update(generation(1, false)).await.unwrap().unwrap();
        let mut view = worker.open_client();
        assert_eq!(view.controller(), Some(first.generation));

        // a controlled view keeps the new generation waiting
        assert_eq!(worker.update(generation(2, false)).await.unwrap(), None);
        assert!(matches!(
            worker.activate().await,
            Err(ActivationError::NotEligible(1))
        ));
        assert!(worker.storage().has("turnos-static-v1").await.unwrap());
        assert_eq!(view.try_recv(), None);

        // unrecognized messages change nothing
        for message in [json!({"type": "RELOAD"}), json!({"type": "SW_ACTIVATED"}), json!(1)] {
            assert!(worker.message(&message).await.unwrap().is_none());
        }
        assert!(worker.waiting().is_some());

        let report = worker
            .message(&json!({"type": "SKIP_WAITING"}))
            .await
            .unwrap()
            .unwrap();
        assert_ne!(report.generation, first.generation);
        assert_eq!(view.controller(), Some(report.generation));
        assert_eq!(view.try_recv(), Some(ControlMessage::SwActivated));
        assert!(!worker.storage().has("turnos-static-v1").await.unwrap());

        // nothing is waiting anymore
        assert!(worker
            .message(&json!({"type": "SKIP_WAITING"}))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_waiting_until_views_close() {
        test::setup();
        let cache_dir = test::tempdir();
        let worker = worker(&cache_dir, online());

        worker.update(generation(1, false)).await.unwrap();
        let view = worker.open_client();
        assert_eq!(worker.update(generation(2, false)).await.unwrap(), None);

        drop(view);
        let report = worker.activate().await.unwrap();
        assert_eq!(report.notified, 0);
        assert_eq!(report.purged.len(), 2);
    }

    #[tokio::test]
    async fn test_fetch_without_active_generation() {
        test::setup();
        let cache_dir = test::tempdir();
        let worker = worker(&cache_dir, online());

        let response = worker
            .fetch(Request::navigate("https://app.test/".parse().unwrap()))
            .await;
        assert_eq!(response, Response::ok("<h1>Turnos</h1>"));

        let response = worker
            .fetch(Request::navigate("https://app.test/other".parse().unwrap()))
            .await;
        assert_eq!(response, Response::gateway_timeout());

        worker.settle().await;
        assert!(worker.storage().keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_restore_serves_offline() {
        test::setup();
        let cache_dir = test::tempdir();

        let installed = {
            let worker = worker(&cache_dir, online());
            worker.update(generation(1, true)).await.unwrap().unwrap()
        };

        let offline = Arc::new(MockFetcher::new());
        let worker = worker(&cache_dir, offline);
        assert_eq!(worker.restore().await.unwrap(), Some(installed.generation));

        let icon = Request::get(ASSETS[1].parse().unwrap());
        assert_eq!(worker.fetch(icon).await, Response::ok(ASSETS[1]));

        let page = worker
            .fetch(Request::navigate("https://app.test/".parse().unwrap()))
            .await;
        assert_eq!(page.body, OFFLINE_PAGE.as_bytes());
    }

    #[tokio::test]
    async fn test_handle_events() {
        test::setup();
        let cache_dir = test::tempdir();
        let worker = worker(&cache_dir, online());

        let outcome = worker
            .handle_event(Event::Install(generation(1, false)))
            .await
            .unwrap();
        let EventOutcome::Installed(installed) = outcome else {
            panic!("unexpected outcome: {outcome:?}");
        };

        let outcome = worker.handle_event(Event::Activate).await.unwrap();
        assert!(matches!(outcome, EventOutcome::Activated(report) if report.generation == installed));

        let request = Request::get(ASSETS[0].parse().unwrap());
        let outcome = worker.handle_event(Event::Fetch(request)).await.unwrap();
        assert!(matches!(outcome, EventOutcome::Response(response) if response == Response::ok(ASSETS[0])));

        let outcome = worker
            .handle_event(Event::Message(json!({"kind": "PING"})))
            .await
            .unwrap();
        assert!(matches!(outcome, EventOutcome::Ignored));

        let result = worker.handle_event(Event::Activate).await;
        assert!(matches!(
            result,
            Err(LifecycleError::Activation(ActivationError::NothingWaiting))
        ));
    }
}
