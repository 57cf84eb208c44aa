//! Messages carried on a session's outbound stream

use serde::{Deserialize, Serialize};

/// Kind of stream message, also used as the SSE event name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Chat,
    Partial,
    Activities,
    Nutrition,
    EndSession,
}

impl MessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::Chat => "chat",
            MessageType::Partial => "partial",
            MessageType::Activities => "activities",
            MessageType::Nutrition => "nutrition",
            MessageType::EndSession => "end_session",
        }
    }
}

/// One item delivered to the client.
///
/// Structured results (`activities`, `nutrition`) carry their payload as
/// JSON text in `message`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamMessage {
    pub session_id: String,
    pub correlation_id: String,
    pub message_type: MessageType,
    pub message: String,
}

impl StreamMessage {
    pub fn new(
        session_id: impl Into<String>,
        correlation_id: impl Into<String>,
        message_type: MessageType,
        message: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            correlation_id: correlation_id.into(),
            message_type,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_wire_names_match_serde() {
        for kind in [
            MessageType::Chat,
            MessageType::Partial,
            MessageType::Activities,
            MessageType::Nutrition,
            MessageType::EndSession,
        ] {
            let json = serde_json::to_value(kind).unwrap();
            assert_eq!(json, serde_json::Value::String(kind.as_str().to_string()));
        }
    }
}
