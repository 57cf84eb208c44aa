//! `endSession` - the terminal tool

use super::{DispatchError, Tool, ToolContext, ToolOutcome};
use crate::relay::MessageType;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

pub struct EndSessionTool;

#[derive(Debug, Deserialize)]
struct EndSessionInput {
    message: String,
}

#[async_trait]
impl Tool for EndSessionTool {
    fn name(&self) -> &'static str {
        "endSession"
    }

    fn description(&self) -> String {
        "End the session with a closing message to the user. No other tool may be called afterwards.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["message"],
            "properties": {
                "message": {
                    "type": "string",
                    "description": "Closing message shown to the user"
                }
            }
        })
    }

    /// Emit the closing message, drop the stored transcript, close the relay.
    async fn run(&self, input: Value, ctx: &ToolContext) -> Result<ToolOutcome, DispatchError> {
        let parsed: EndSessionInput =
            serde_json::from_value(input).map_err(|e| DispatchError::invalid(self.name(), e))?;

        ctx.relay()
            .send(ctx.message(MessageType::EndSession, parsed.message))
            .await;

        let deleted = ctx.history().delete(&ctx.session_id).await;
        ctx.relay().close(&ctx.session_id);
        if let Err(e) = deleted {
            tracing::error!(session_id = %ctx.session_id, error = %e, "Failed to delete history on session end");
            return Err(e.into());
        }

        tracing::info!(session_id = %ctx.session_id, "Session ended by model");
        Ok(ToolOutcome::Terminated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::HistoryError;
    use crate::tools::tests::Harness;
    use crate::transcript::Transcript;

    #[tokio::test]
    async fn sends_terminal_message_then_tears_down() {
        let mut h = Harness::new();
        h.history
            .save(&Transcript::new("prompt"), &h.session_id)
            .await
            .unwrap();

        let outcome = EndSessionTool
            .run(json!({"message": "Take care!"}), &h.ctx())
            .await
            .unwrap();
        assert_eq!(outcome, ToolOutcome::Terminated);

        let msg = h.rx.recv().await.unwrap();
        assert_eq!(msg.message_type, MessageType::EndSession);
        assert_eq!(msg.message, "Take care!");
        assert!(h.rx.recv().await.is_none());

        assert!(!h.relay.is_open(&h.session_id));
        assert!(matches!(
            h.history.load(&h.session_id).await,
            Err(HistoryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn missing_message_leaves_session_open() {
        let h = Harness::new();
        let err = EndSessionTool.run(json!({}), &h.ctx()).await.unwrap_err();
        assert!(matches!(err, DispatchError::InvalidArguments { .. }));
        assert!(h.relay.is_open(&h.session_id));
    }
}
