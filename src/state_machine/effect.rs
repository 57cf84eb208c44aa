//! Effects produced by state transitions

use crate::transcript::{ToolCall, Turn};

/// Effects to be executed, in order, after a transition
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Append a turn to the in-memory transcript
    AppendTurn(Turn),

    /// Call the model with the current transcript
    RequestModel { opening: bool },

    /// Run tool calls through the dispatcher
    DispatchTools(Vec<ToolCall>),

    /// Save the transcript to the history store
    PersistTranscript,

    /// Feed a system directive back in without user input
    Continue { prompt: String },

    /// Finish the call with this text
    Reply(String),
}
