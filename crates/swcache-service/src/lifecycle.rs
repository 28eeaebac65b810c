//! Worker generations and the steps of their lifecycle.
//!
//! A [`Generation`] is one deployed version of the worker, identified by its pair of region
//! names. It is *installed* by precaching the core assets into its static region, then waits
//! until it is allowed to *activate*. Activation purges every region not belonging to it,
//! claims all open client views, and tells them about the new version.
//!
//! The orchestration of these steps lives in [`ServiceWorker`](crate::service::ServiceWorker);
//! this module holds the individual steps and their errors.

use std::error::Error;
use std::fmt;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future;
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::caching::{CacheError, CacheStorage, CacheWriteError, RegionName};
use crate::clients::Clients;
use crate::config::WorkerConfig;
use crate::control::ControlMessage;
use crate::network::{Fetch, FetchMode, NetworkError};
use crate::scope::{Scope, ScopeError};
use crate::types::Request;

/// File below the cache directory recording the active generation.
const REGISTRATION_FILE: &str = "registration.json";

/// Unique identifier of a [`Generation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GenerationId(Uuid);

impl GenerationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for GenerationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for GenerationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// An invalid generation configuration.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("static and runtime region must differ, both are `{0}`")]
    SameRegion(RegionName),
    #[error(transparent)]
    Scope(#[from] ScopeError),
}

/// Installing a generation failed; it will never become eligible for activation.
#[derive(Debug, thiserror::Error)]
pub enum PrecacheError {
    #[error("failed to fetch core asset `{url}`")]
    Fetch {
        url: Url,
        #[source]
        source: NetworkError,
    },
    #[error("core asset `{url}` responded with status {status}")]
    Status {
        url: Url,
        status: reqwest::StatusCode,
    },
    #[error("failed to store core asset `{url}`")]
    Write {
        url: Url,
        #[source]
        source: CacheWriteError,
    },
    #[error("failed to open the regions of the generation")]
    Storage(#[from] CacheError),
}

/// Activating the waiting generation failed or was not possible.
#[derive(Debug, thiserror::Error)]
pub enum ActivationError {
    #[error("no generation is waiting for activation")]
    NothingWaiting,
    #[error("the active generation still controls {0} client view(s)")]
    NotEligible(usize),
    #[error("failed to purge stale regions")]
    Storage(#[from] CacheError),
}

/// Summary of a completed activation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationReport {
    /// The generation that became active.
    pub generation: GenerationId,
    /// Names of the regions that were deleted.
    pub purged: Vec<String>,
    /// Number of client views that changed their controller.
    pub claimed: usize,
    /// Number of client views sent `SW_ACTIVATED`.
    pub notified: usize,
    /// Number of client views that could not be notified.
    pub failed: usize,
}

/// One deployed version of the worker.
#[derive(Debug)]
pub struct Generation {
    id: GenerationId,
    config: WorkerConfig,
    scope: Scope,
    skip_waiting: AtomicBool,
}

impl Generation {
    pub fn from_config(config: WorkerConfig) -> Result<Self, GenerationError> {
        Self::with_id(GenerationId::new(), config)
    }

    fn with_id(id: GenerationId, config: WorkerConfig) -> Result<Self, GenerationError> {
        if config.static_region == config.runtime_region {
            return Err(GenerationError::SameRegion(config.static_region));
        }
        let scope = Scope::from_config(&config)?;

        Ok(Self {
            id,
            config,
            scope,
            skip_waiting: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> GenerationId {
        self.id
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn static_region(&self) -> &RegionName {
        &self.config.static_region
    }

    pub fn runtime_region(&self) -> &RegionName {
        &self.config.runtime_region
    }

    /// Marks this generation as allowed to supersede the active one right away.
    pub fn skip_waiting(&self) {
        self.skip_waiting.store(true, Ordering::Relaxed);
    }

    pub fn is_skip_waiting(&self) -> bool {
        self.skip_waiting.load(Ordering::Relaxed)
    }

    /// Creates both regions, then fetches every core asset and stores them in the static region.
    ///
    /// All assets are fetched before anything is written, so a failing fetch or an error status
    /// leaves the static region untouched.
    pub async fn precache(
        &self,
        storage: &CacheStorage,
        fetcher: &dyn Fetch,
    ) -> Result<usize, PrecacheError> {
        let region = storage.open(self.static_region()).await?;
        storage.open(self.runtime_region()).await?;

        let fetches = self.scope.core_assets().iter().map(|url| async move {
            let request = Request::get(url.clone());
            let response = fetcher
                .fetch(&request, FetchMode::Default)
                .await
                .map_err(|source| PrecacheError::Fetch {
                    url: url.clone(),
                    source,
                })?;
            if !response.status.is_success() {
                return Err(PrecacheError::Status {
                    url: url.clone(),
                    status: response.status,
                });
            }
            Ok((request, response))
        });
        let fetched = future::try_join_all(fetches).await?;

        for (request, response) in &fetched {
            region
                .put(request, response)
                .await
                .map_err(|source| PrecacheError::Write {
                    url: request.url.clone(),
                    source,
                })?;
        }

        Ok(fetched.len())
    }
}

/// Deletes every region not belonging to `generation`, returning the deleted names.
pub async fn purge_stale_regions(
    storage: &CacheStorage,
    generation: &Generation,
) -> Result<Vec<String>, CacheError> {
    let live = [generation.static_region(), generation.runtime_region()];
    let purged = storage.retain(&live, false).await?;

    for name in &purged {
        tracing::info!(region = %name, "Purged stale region");
    }
    metric!(counter("lifecycle.regions_purged") += purged.len() as i64);
    Ok(purged)
}

/// Sends `SW_ACTIVATED` to every open client view, controlled by `generation` or not.
///
/// Returns the number of views notified and the number that could not be.
pub fn notify_clients(clients: &Clients, generation: GenerationId) -> (usize, usize) {
    let (mut notified, mut failed) = (0, 0);
    for client in clients.match_all(generation, true) {
        // Fire-and-forget: a view that went away does not fail the activation.
        match client.post_message(ControlMessage::SwActivated) {
            Ok(()) => notified += 1,
            Err(e) => {
                failed += 1;
                tracing::debug!(
                    error = &e as &dyn Error,
                    "Failed to notify client view"
                );
            }
        }
    }
    if failed > 0 {
        metric!(counter("lifecycle.notifications_failed") += failed as i64);
    }
    (notified, failed)
}

/// What is persisted about the active generation.
#[derive(Debug, Serialize, Deserialize)]
struct RegistrationRecord {
    id: GenerationId,
    worker: WorkerConfig,
}

fn registration_path(root: &Path) -> PathBuf {
    root.join(REGISTRATION_FILE)
}

/// Records `generation` as the active one below `root`.
pub async fn save_registration(root: &Path, generation: &Generation) -> io::Result<()> {
    let record = RegistrationRecord {
        id: generation.id(),
        worker: generation.config().clone(),
    };
    let contents = serde_json::to_vec_pretty(&record)?;
    let root = root.to_owned();

    tokio::task::spawn_blocking(move || {
        let mut file = tempfile::NamedTempFile::new_in(&root)?;
        file.write_all(&contents)?;
        file.as_file().sync_data()?;
        file.persist(registration_path(&root))
            .map(drop)
            .map_err(|e| e.error)
    })
    .await
    .map_err(io::Error::other)?
}

/// Loads the generation recorded as active below `root`, if any.
pub async fn load_registration(root: &Path) -> anyhow::Result<Option<Generation>> {
    let contents = match tokio::fs::read(registration_path(root)).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let record: RegistrationRecord = serde_json::from_slice(&contents)?;
    Ok(Some(Generation::with_id(record.id, record.worker)?))
}
