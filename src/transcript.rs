//! Ordered conversation transcript
//!
//! The first turn is always the system prompt. Turns carry the tool calls
//! the assistant made so the model sees its own earlier extractions when the
//! transcript is replayed on the next request.

use crate::llm::{ContentBlock, LlmMessage, LlmRequest, MessageRole, SystemContent, ToolDefinition};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Who produced a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    Human,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Role::System => "system",
            Role::Human => "human",
            Role::Assistant => "assistant",
        })
    }
}

/// A tool invocation requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

impl Turn {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn assistant(text: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            tool_calls,
        }
    }
}

/// Ordered turn sequence, seeded with a system prompt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transcript(Vec<Turn>);

impl Transcript {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self(vec![Turn::new(Role::System, system_prompt)])
    }

    /// Rebuild from persisted turns. Returns `None` unless the first turn is
    /// a system turn.
    pub fn from_turns(turns: Vec<Turn>) -> Option<Self> {
        match turns.first() {
            Some(first) if first.role == Role::System => Some(Self(turns)),
            _ => None,
        }
    }

    pub fn push(&mut self, turn: Turn) {
        self.0.push(turn);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.0.last()
    }

    /// Build a model request. The leading system turn becomes the system
    /// prompt; later system turns stay inline as directives.
    pub fn to_request(&self, tools: Vec<ToolDefinition>) -> LlmRequest {
        let mut turns = self.0.iter();
        let system = turns
            .next()
            .map(|t| vec![SystemContent::new(t.text.clone())])
            .unwrap_or_default();

        let mut messages = Vec::new();
        for turn in turns {
            match turn.role {
                Role::System => messages.push(LlmMessage::text(MessageRole::System, &turn.text)),
                Role::Human => messages.push(LlmMessage::text(MessageRole::User, &turn.text)),
                Role::Assistant => {
                    let mut content = Vec::new();
                    if !turn.text.is_empty() {
                        content.push(ContentBlock::text(&turn.text));
                    }
                    for call in &turn.tool_calls {
                        content.push(ContentBlock::tool_use(
                            &call.id,
                            &call.name,
                            call.arguments.clone(),
                        ));
                    }
                    if content.is_empty() {
                        content.push(ContentBlock::text(""));
                    }
                    messages.push(LlmMessage {
                        role: MessageRole::Assistant,
                        content,
                    });

                    // Providers require every tool call to be answered
                    if !turn.tool_calls.is_empty() {
                        messages.push(LlmMessage {
                            role: MessageRole::User,
                            content: turn
                                .tool_calls
                                .iter()
                                .map(|c| ContentBlock::tool_result(&c.id, "recorded"))
                                .collect(),
                        });
                    }
                }
            }
        }

        LlmRequest {
            system,
            messages,
            tools,
            max_tokens: None,
        }
    }
}
