//! Events that drive a turn

use crate::transcript::{Role, ToolCall};

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Session start: ask the model for its opening line
    Begin,

    /// A human message or a continuation directive
    Input { role: Role, text: String },

    /// Model call finished
    ModelReplied {
        text: String,
        tool_calls: Vec<ToolCall>,
    },

    /// All tool calls of the last reply were dispatched
    ToolsDispatched {
        /// Tools that ran, in order
        names: Vec<String>,
        terminal: bool,
    },
}
