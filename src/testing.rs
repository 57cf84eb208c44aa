//! Mock implementations for testing
//!
//! These mocks let the orchestrator and HTTP layer run without a real model.

use crate::llm::{ContentBlock, LlmError, LlmRequest, LlmResponse, LlmService};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

struct Scripted {
    chunks: Vec<String>,
    result: Result<LlmResponse, LlmError>,
}

/// Mock LLM client that replays queued responses, streaming their chunks
pub struct MockLlmClient {
    script: Mutex<VecDeque<Scripted>>,
    model_id: String,
    delay: Mutex<Duration>,
    /// Record of all requests made
    pub requests: Mutex<Vec<LlmRequest>>,
    /// Notified when a request starts (for test synchronization)
    pub request_started: Arc<Notify>,
}

impl MockLlmClient {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            model_id: model_id.into(),
            delay: Mutex::new(Duration::ZERO),
            requests: Mutex::new(Vec::new()),
            request_started: Arc::new(Notify::new()),
        }
    }

    /// Wait this long before answering each later request
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    /// Queue a plain text reply, streamed as a single chunk
    pub fn queue_text(&self, text: &str) {
        self.queue_streamed(&[text], LlmResponse::from_text(text));
    }

    /// Queue a reply that calls one tool
    pub fn queue_tool(&self, name: &str, input: Value) {
        self.queue_response(tool_response(name, input));
    }

    /// Queue a successful response with no streamed chunks
    pub fn queue_response(&self, response: LlmResponse) {
        self.queue_streamed(&[], response);
    }

    /// Queue a response whose text arrives as the given chunks
    pub fn queue_streamed(&self, chunks: &[&str], response: LlmResponse) {
        self.script.lock().unwrap().push_back(Scripted {
            chunks: chunks.iter().map(ToString::to_string).collect(),
            result: Ok(response),
        });
    }

    /// Queue an error response
    pub fn queue_error(&self, error: LlmError) {
        self.script.lock().unwrap().push_back(Scripted {
            chunks: Vec::new(),
            result: Err(error),
        });
    }

    /// Get recorded requests
    pub fn recorded_requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmService for MockLlmClient {
    async fn complete(
        &self,
        request: &LlmRequest,
        on_token: &mut (dyn for<'t> FnMut(&'t str) + Send),
    ) -> Result<LlmResponse, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        self.request_started.notify_waiters();
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let next = self.script.lock().unwrap().pop_front();
        let Some(scripted) = next else {
            return Err(LlmError::network("No mock response queued"));
        };
        for chunk in &scripted.chunks {
            on_token(chunk);
        }
        scripted.result
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

/// Response carrying a single tool call
pub fn tool_response(name: &str, input: Value) -> LlmResponse {
    LlmResponse {
        content: vec![ContentBlock::tool_use(
            format!("call_{name}"),
            name,
            input,
        )],
        end_turn: false,
        usage: crate::llm::Usage::default(),
    }
}
