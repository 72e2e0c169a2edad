//! SSE mirror of the live channel.

use crate::AppState;
use axum::{
    extract::Extension,
    response::{sse::Event, Sse},
};
use futures_util::Stream;
use std::{convert::Infallible, sync::Arc};
use tokio_stream::StreamExt;

/// Handler for `GET /events/sensors`.
///
/// Streams the same events as the WebSocket channel, using the event type
/// (`initial-data`, `sensor-data`) as the SSE event name.
pub async fn sensor_stream_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = state.hub.subscribe();
    tracing::debug!(subscriber = subscription.id(), "SSE client subscribed");

    let stream = subscription.filter_map(|event| match serde_json::to_string(&event) {
        Ok(data) => Some(Ok(Event::default().event(event.name()).data(data))),
        Err(e) => {
            tracing::error!(event = event.name(), "failed to serialize live event: {}", e);
            None
        }
    });

    Sse::new(stream).keep_alive(axum::response::sse::KeepAlive::default())
}
