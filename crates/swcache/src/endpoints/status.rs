use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};
use swcache_service::lifecycle::{ActivationReport, Generation, GenerationId};

use super::{AppState, ResponseError};

/// A generation, as reported by the status endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct GenerationStatus {
    pub id: GenerationId,
    pub static_region: String,
    pub runtime_region: String,
}

impl From<&Generation> for GenerationStatus {
    fn from(generation: &Generation) -> Self {
        Self {
            id: generation.id(),
            static_region: generation.static_region().to_string(),
            runtime_region: generation.runtime_region().to_string(),
        }
    }
}

/// Body of `GET /_swcache/status`.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub active: Option<GenerationStatus>,
    pub waiting: Option<GenerationStatus>,
    /// All storage regions, in creation order.
    pub regions: Vec<String>,
    /// Number of connected client views.
    pub clients: usize,
}

/// An activation, as reported to the client view that triggered it.
#[derive(Debug, Serialize, Deserialize)]
pub struct ActivationStatus {
    pub generation: GenerationId,
    pub purged: Vec<String>,
    pub claimed: usize,
    pub notified: usize,
}

impl From<ActivationReport> for ActivationStatus {
    fn from(report: ActivationReport) -> Self {
        Self {
            generation: report.generation,
            purged: report.purged,
            claimed: report.claimed,
            notified: report.notified,
        }
    }
}

pub async fn get_status(
    State(state): State<AppState>,
) -> Result<Json<StatusResponse>, ResponseError> {
    let worker = &state.worker;
    let regions = worker
        .storage()
        .keys()
        .await
        .map_err(anyhow::Error::from)?;

    Ok(Json(StatusResponse {
        active: worker.active().as_deref().map(GenerationStatus::from),
        waiting: worker.waiting().as_deref().map(GenerationStatus::from),
        regions,
        clients: worker.clients().len(),
    }))
}
