//! Turn state types

use crate::transcript::ToolCall;

/// Where one `start`/`advance` call is in its turn loop
#[derive(Debug, Clone, PartialEq)]
pub enum TurnState {
    /// Transcript seeded, no model call yet
    Starting,

    /// Waiting for the model. `opening` marks the first reply of a session,
    /// which is delivered as plain chat.
    AwaitingModel { depth: u32, opening: bool },

    /// Running the tool calls from the last reply
    Dispatching { depth: u32, calls: Vec<ToolCall> },

    /// Non-terminal tools ran; a continuation prompt goes to the model next
    Continuing { depth: u32 },

    /// Turn finished with a plain-text reply
    AwaitingUser,

    /// Terminal tool fired; session torn down
    Closed,
}

impl TurnState {
    /// Number of continuations already taken in this call
    pub fn depth(&self) -> u32 {
        match self {
            TurnState::AwaitingModel { depth, .. }
            | TurnState::Dispatching { depth, .. }
            | TurnState::Continuing { depth } => *depth,
            TurnState::Starting | TurnState::AwaitingUser | TurnState::Closed => 0,
        }
    }
}

/// Immutable per-session settings the transition function reads
#[derive(Debug, Clone)]
pub struct TurnContext {
    pub session_id: String,
    pub max_continuations: u32,
}

impl TurnContext {
    pub fn new(session_id: impl Into<String>, max_continuations: u32) -> Self {
        Self {
            session_id: session_id.into(),
            max_continuations,
        }
    }
}
