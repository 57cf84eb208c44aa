//! HTTP API
//!
//! One SSE stream per session carries every server-to-client message;
//! user messages arrive as plain POSTs and are answered on that stream.

mod handlers;
mod sse;
mod types;

pub use handlers::create_router;

use crate::auth::TokenVerifier;
use crate::conversation::ConversationEngine;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ConversationEngine>,
    pub auth: Arc<TokenVerifier>,
    /// Bound of the per-connection outbound channel
    pub outbound_capacity: usize,
}

impl AppState {
    pub fn new(engine: Arc<ConversationEngine>, auth: Arc<TokenVerifier>, outbound_capacity: usize) -> Self {
        Self {
            engine,
            auth,
            outbound_capacity: outbound_capacity.max(1),
        }
    }
}
