//! Tool registry and dispatcher
//!
//! Tools are stateless singletons; every call receives a [`ToolContext`]
//! carrying the session it belongs to. The registry is built once and only
//! read afterwards, so one instance serves all sessions concurrently.

pub(crate) mod activities;
mod end_session;
mod food;
mod parallel;

pub use activities::ParseActivitiesTool;
pub use end_session::EndSessionTool;
pub use food::ParseFoodTool;

use crate::history::{HistoryError, SecureHistoryStore};
use crate::llm::ToolDefinition;
use crate::relay::{MessageType, SessionRelay, StreamMessage, ToolClaim};
use crate::transcript::ToolCall;
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },
    #[error("history error: {0}")]
    History(#[from] HistoryError),
}

impl DispatchError {
    pub fn invalid(tool: &str, reason: impl std::fmt::Display) -> Self {
        Self::InvalidArguments {
            tool: tool.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// What a single tool invocation did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolOutcome {
    /// Side effect performed
    Completed,
    /// Already performed earlier in this session; nothing emitted
    Duplicate,
    /// Session torn down
    Terminated,
}

/// Context for one tool invocation
#[derive(Clone)]
pub struct ToolContext {
    pub session_id: String,
    pub correlation_id: String,
    /// Call time; relative times in arguments are resolved against it
    pub now: DateTime<Utc>,
    relay: Arc<SessionRelay>,
    history: Arc<SecureHistoryStore>,
}

impl ToolContext {
    pub fn new(
        session_id: impl Into<String>,
        correlation_id: impl Into<String>,
        relay: Arc<SessionRelay>,
        history: Arc<SecureHistoryStore>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            correlation_id: correlation_id.into(),
            now: Utc::now(),
            relay,
            history,
        }
    }

    pub fn relay(&self) -> &SessionRelay {
        &self.relay
    }

    pub fn history(&self) -> &SecureHistoryStore {
        &self.history
    }

    /// Absolute unix timestamp for "`minutes_ago` minutes before the call".
    /// Missing or negative values mean now; values past the calendar range
    /// are rejected as invalid arguments of `tool`.
    #[allow(clippy::cast_possible_truncation)]
    pub fn resolve_minutes_ago(
        &self,
        tool: &str,
        minutes_ago: Option<f64>,
    ) -> Result<i64, DispatchError> {
        let minutes = minutes_ago.filter(|m| m.is_finite()).unwrap_or(0.0).max(0.0);
        // Float-to-int casts saturate, so huge inputs land on i64::MAX and fail below
        let seconds = (minutes * 60.0).round() as i64;
        TimeDelta::try_seconds(seconds)
            .and_then(|delta| self.now.checked_sub_signed(delta))
            .map(|at| at.timestamp())
            .ok_or_else(|| {
                DispatchError::invalid(tool, format!("time_minutes_ago out of range: {minutes}"))
            })
    }

    pub fn message(&self, message_type: MessageType, message: impl Into<String>) -> StreamMessage {
        StreamMessage::new(
            &self.session_id,
            &self.correlation_id,
            message_type,
            message,
        )
    }
}

/// A tool the model can call
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name
    fn name(&self) -> &'static str;

    /// Tool description for LLM
    fn description(&self) -> String;

    /// JSON schema for tool input
    fn input_schema(&self) -> Value;

    async fn run(&self, input: Value, ctx: &ToolContext) -> Result<ToolOutcome, DispatchError>;
}

/// Round a model-supplied mood score onto the 0-100 scale
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub(crate) fn normalize_mood(mood: Option<f64>) -> Option<u8> {
    mood.filter(|m| m.is_finite())
        .map(|m| m.round().clamp(0.0, 100.0) as u8)
}

/// Shared path for the extraction tools: guard once per session, then emit
/// the structured payload on the relay.
pub(crate) async fn emit_once<T: Serialize + Sync>(
    tool: &str,
    message_type: MessageType,
    payload: &T,
    ctx: &ToolContext,
) -> Result<ToolOutcome, DispatchError> {
    match ctx.relay().claim_tool(&ctx.session_id, tool) {
        ToolClaim::Repeat => {
            tracing::info!(session_id = %ctx.session_id, tool = %tool, "Duplicate tool call ignored");
            return Ok(ToolOutcome::Duplicate);
        }
        ToolClaim::SessionClosed => {
            tracing::debug!(session_id = %ctx.session_id, tool = %tool, "Tool call on closed session");
            return Ok(ToolOutcome::Duplicate);
        }
        ToolClaim::First => {}
    }

    let body = serde_json::to_string(payload).map_err(|e| DispatchError::invalid(tool, e))?;
    ctx.relay().send(ctx.message(message_type, body)).await;
    Ok(ToolOutcome::Completed)
}

/// Aggregate result of dispatching one model tool call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    /// Names and outcomes of every tool that ran, in order
    pub executed: Vec<(String, ToolOutcome)>,
}

impl DispatchReport {
    pub fn terminal(&self) -> bool {
        self.executed
            .iter()
            .any(|(_, outcome)| *outcome == ToolOutcome::Terminated)
    }
}

/// Name-indexed collection of tools
pub struct ToolRegistry {
    tools: HashMap<&'static str, Arc<dyn Tool>>,
    order: Vec<&'static str>,
}

impl ToolRegistry {
    /// Create the standard journaling tool set
    pub fn standard() -> Self {
        let tools: Vec<Arc<dyn Tool>> = vec![
            Arc::new(ParseActivitiesTool),
            Arc::new(ParseFoodTool),
            Arc::new(EndSessionTool),
        ];
        Self::from_tools(tools)
    }

    pub fn from_tools(tools: Vec<Arc<dyn Tool>>) -> Self {
        let order = tools.iter().map(|t| t.name()).collect();
        let tools = tools.into_iter().map(|t| (t.name(), t)).collect();
        Self { tools, order }
    }

    /// Get all tool definitions for LLM
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description(),
                input_schema: t.input_schema(),
            })
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    /// Run one model tool call, unpacking the parallel wrapper.
    ///
    /// Parallel calls run in order and stop at the first failure.
    pub async fn dispatch(
        &self,
        call: &ToolCall,
        ctx: &ToolContext,
    ) -> Result<DispatchReport, DispatchError> {
        let calls = if call.name == parallel::PARALLEL_TOOL_NAME {
            parallel::unpack(&call.arguments)?
        } else {
            vec![(call.name.clone(), call.arguments.clone())]
        };

        let mut executed = Vec::with_capacity(calls.len());
        for (name, arguments) in calls {
            let tool = self
                .get(&name)
                .ok_or_else(|| DispatchError::UnknownTool(name.clone()))?;
            tracing::info!(session_id = %ctx.session_id, tool = %name, "Dispatching tool call");
            let outcome = tool.run(arguments, ctx).await?;
            executed.push((name, outcome));
            if outcome == ToolOutcome::Terminated {
                break;
            }
        }

        Ok(DispatchReport { executed })
    }
}
