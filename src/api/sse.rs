//! Server-Sent Events for the session stream

use crate::conversation::ConversationEngine;
use crate::relay::StreamMessage;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{self, Stream};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Tears the session down when the client's stream is dropped
pub struct SessionGuard {
    engine: Arc<ConversationEngine>,
    session_id: String,
}

impl SessionGuard {
    pub fn new(engine: Arc<ConversationEngine>, session_id: impl Into<String>) -> Self {
        Self {
            engine,
            session_id: session_id.into(),
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if !self.engine.relay().is_open(&self.session_id) {
            // Closed by endSession or the sweeper; history already dropped
            return;
        }
        tracing::info!(session_id = %self.session_id, "Client disconnected, closing session");
        self.engine.relay().close(&self.session_id);
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(session_id = %self.session_id, "No runtime to delete history on disconnect");
            return;
        };
        let engine = Arc::clone(&self.engine);
        let session_id = std::mem::take(&mut self.session_id);
        handle.spawn(async move {
            engine.close_session(&session_id).await;
        });
    }
}

/// Stream relay messages to the client until the session closes.
///
/// The guard lives as long as the stream.
pub fn session_stream(
    rx: mpsc::Receiver<StreamMessage>,
    guard: SessionGuard,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let events = stream::unfold((rx, guard), |(mut rx, guard)| async move {
        let message = rx.recv().await?;
        Some((Ok::<_, Infallible>(to_event(&message)), (rx, guard)))
    });

    Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

fn to_event(message: &StreamMessage) -> Event {
    let event = Event::default().event(message.message_type.as_str());
    match serde_json::to_string(message) {
        Ok(data) => event.data(data),
        Err(e) => {
            tracing::error!(session_id = %message.session_id, error = %e, "Failed to encode stream message");
            event.data("{}")
        }
    }
}
