use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::status::ActivationStatus;
use super::{AppState, ResponseError};

/// Body of the response to `POST /_swcache/message`.
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    /// Set if the message made a waiting generation active.
    pub activated: Option<ActivationStatus>,
}

/// Delivers a message of a client view to the worker.
///
/// Messages that are not understood are accepted and ignored.
pub async fn post_message(
    State(state): State<AppState>,
    Json(message): Json<Value>,
) -> Result<Json<MessageResponse>, ResponseError> {
    sentry::configure_scope(|scope| {
        scope.set_transaction(Some("POST /_swcache/message"));
    });

    let report = state.worker.message(&message).await?;
    Ok(Json(MessageResponse {
        activated: report.map(ActivationStatus::from),
    }))
}
