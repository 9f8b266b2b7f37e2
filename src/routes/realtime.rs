//! Real-time notifications over Server-Sent Events

use std::convert::Infallible;

use axum::{
    extract::State,
    response::sse::{Event as SseEvent, KeepAlive, Sse},
};
use futures::stream::{self, Stream};
use tokio::sync::broadcast::error::RecvError;

use crate::state::AppState;

/// GET /realtime
pub async fn subscribe(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = state.events().subscribe();
    tracing::debug!(subscribers = state.events().subscriber_count(), "Realtime client connected");

    let stream = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => match SseEvent::default().event(event.kind.as_str()).json_data(&event) {
                    Ok(sse) => return Some((Ok(sse), rx)),
                    Err(e) => tracing::warn!(error = %e, "Failed to encode event"),
                },
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Realtime client lagging, events dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
