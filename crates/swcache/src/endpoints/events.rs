use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use futures::stream;
use swcache_service::clients::ClientView;
use swcache_service::control::ControlMessage;

use super::AppState;

fn to_event(message: ControlMessage) -> Result<Event, axum::Error> {
    Event::default().event(message.as_str()).json_data(message)
}

/// Opens a client view and streams the control messages posted to it as server-sent events.
///
/// The view is controlled by the generation active when it connects, and goes away when the
/// connection is closed.
pub async fn subscribe_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let view = state.worker.open_client();
    tracing::debug!(client = %view.id(), "Client view connected");

    let events = stream::unfold(view, |mut view: ClientView| async move {
        let message = view.recv().await?;
        Some((to_event(message), view))
    });

    Sse::new(events).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
