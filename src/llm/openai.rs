//! `OpenAI`-compatible chat completions provider with token streaming

use super::sse::{SseEvent, SseParser};
use super::types::{ContentBlock, LlmMessage, LlmRequest, LlmResponse, MessageRole, Usage};
use super::{LlmError, LlmService};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Streaming chat completions client
pub struct OpenAIService {
    client: Client,
    api_key: String,
    endpoint: String,
    model: String,
}

impl OpenAIService {
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: &str,
    ) -> Result<Self, LlmError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| LlmError::unknown(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model: model.into(),
        })
    }

    fn translate_request(&self, request: &LlmRequest) -> OpenAIRequest {
        let mut messages = Vec::new();

        if !request.system.is_empty() {
            let system_text = request
                .system
                .iter()
                .map(|s| s.text.as_str())
                .collect::<Vec<_>>()
                .join("\n\n");
            messages.push(OpenAIMessage::plain("system", system_text));
        }

        for msg in &request.messages {
            messages.extend(Self::translate_message(msg));
        }

        let tools = if request.tools.is_empty() {
            None
        } else {
            Some(
                request
                    .tools
                    .iter()
                    .map(|t| OpenAITool {
                        r#type: "function".to_string(),
                        function: OpenAIFunction {
                            name: t.name.clone(),
                            description: t.description.clone(),
                            parameters: t.input_schema.clone(),
                        },
                    })
                    .collect(),
            )
        };

        OpenAIRequest {
            model: self.model.clone(),
            messages,
            tools,
            max_tokens: request.max_tokens,
            stream: true,
            stream_options: StreamOptions {
                include_usage: true,
            },
        }
    }

    /// Translate an LLM message to `OpenAI` format.
    /// Returns a Vec because tool results need separate messages with role "tool".
    fn translate_message(msg: &LlmMessage) -> Vec<OpenAIMessage> {
        let role = match msg.role {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        };

        let mut text_parts = Vec::new();
        let mut tool_calls = Vec::new();
        let mut tool_results = Vec::new();

        for block in &msg.content {
            match block {
                ContentBlock::Text { text } => text_parts.push(text.clone()),
                ContentBlock::ToolUse { id, name, input } => {
                    tool_calls.push(OpenAIToolCall {
                        id: id.clone(),
                        r#type: "function".to_string(),
                        function: OpenAIFunctionCall {
                            name: name.clone(),
                            arguments: serde_json::to_string(input)
                                .unwrap_or_else(|_| "{}".to_string()),
                        },
                    });
                }
                ContentBlock::ToolResult {
                    tool_use_id,
                    content,
                    is_error,
                } => tool_results.push((tool_use_id.clone(), content.clone(), *is_error)),
            }
        }

        let mut messages = Vec::new();

        if !text_parts.is_empty() || !tool_calls.is_empty() {
            messages.push(OpenAIMessage {
                role: role.to_string(),
                content: (!text_parts.is_empty()).then(|| text_parts.join("\n")),
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                tool_call_id: None,
            });
        }

        for (tool_use_id, content, is_error) in tool_results {
            messages.push(OpenAIMessage {
                role: "tool".to_string(),
                content: Some(if is_error {
                    format!("Error: {content}")
                } else {
                    content
                }),
                tool_calls: None,
                tool_call_id: Some(tool_use_id),
            });
        }

        if messages.is_empty() {
            messages.push(OpenAIMessage::plain(role, String::new()));
        }

        messages
    }
}

#[async_trait]
impl LlmService for OpenAIService {
    async fn complete(
        &self,
        request: &LlmRequest,
        on_token: &mut (dyn for<'t> FnMut(&'t str) + Send),
    ) -> Result<LlmResponse, LlmError> {
        let body = self.translate_request(request);

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::network(format!("Request timeout: {e}"))
                } else if e.is_connect() {
                    LlmError::network(format!("Connection failed: {e}"))
                } else {
                    LlmError::unknown(format!("Request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<OpenAIErrorResponse>(&body)
                .map_or(body, |resp| resp.error.message);
            return Err(LlmError::from_status(status.as_u16(), &message));
        }

        let mut byte_stream = response.bytes_stream();
        let mut parser = SseParser::new();
        let mut state = StreamState::default();
        let mut pending: Vec<u8> = Vec::new();

        'read: while let Some(item) = byte_stream.next().await {
            let bytes = item.map_err(|e| LlmError::network(format!("Stream interrupted: {e}")))?;
            pending.extend_from_slice(&bytes);

            // Hold back an incomplete UTF-8 sequence split across chunks
            let valid = match std::str::from_utf8(&pending) {
                Ok(_) => pending.len(),
                Err(e) if e.error_len().is_none() => e.valid_up_to(),
                Err(_) => pending.len(),
            };
            let text = String::from_utf8_lossy(&pending[..valid]).into_owned();
            pending.drain(..valid);

            for event in parser.push(&text) {
                if state.apply_event(&event, on_token)? == StreamFlow::Done {
                    break 'read;
                }
            }
        }

        if !state.done {
            if let Some(event) = parser.finish() {
                state.apply_event(&event, on_token)?;
            }
        }

        Ok(state.into_response())
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

#[derive(Debug, PartialEq, Eq)]
enum StreamFlow {
    Continue,
    Done,
}

/// Tool call whose arguments are still arriving in fragments
#[derive(Debug, Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Accumulates streamed deltas into a complete response
#[derive(Debug, Default)]
struct StreamState {
    text: String,
    tool_calls: BTreeMap<u32, PartialToolCall>,
    finish_reason: Option<String>,
    usage: Usage,
    done: bool,
}

impl StreamState {
    fn apply_event(
        &mut self,
        event: &SseEvent,
        on_token: &mut (dyn for<'t> FnMut(&'t str) + Send),
    ) -> Result<StreamFlow, LlmError> {
        let data = event.data.trim();
        if data.is_empty() {
            return Ok(StreamFlow::Continue);
        }
        if data == "[DONE]" {
            self.done = true;
            return Ok(StreamFlow::Done);
        }

        if let Ok(err) = serde_json::from_str::<OpenAIErrorResponse>(data) {
            return Err(LlmError::server_error(format!(
                "Stream error: {}",
                err.error.message
            )));
        }

        let chunk: OpenAIStreamChunk = serde_json::from_str(data)
            .map_err(|e| LlmError::unknown(format!("Malformed stream chunk: {e} - {data}")))?;

        if let Some(usage) = chunk.usage {
            self.usage = Usage {
                input_tokens: u64::from(usage.prompt_tokens),
                output_tokens: u64::from(usage.completion_tokens),
            };
        }

        for choice in chunk.choices {
            if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
                on_token(&content);
                self.text.push_str(&content);
            }

            for delta in choice.delta.tool_calls.unwrap_or_default() {
                let entry = self.tool_calls.entry(delta.index).or_default();
                if let Some(id) = delta.id {
                    entry.id = id;
                }
                if let Some(function) = delta.function {
                    if let Some(name) = function.name {
                        entry.name.push_str(&name);
                    }
                    if let Some(arguments) = function.arguments {
                        entry.arguments.push_str(&arguments);
                    }
                }
            }

            if choice.finish_reason.is_some() {
                self.finish_reason = choice.finish_reason;
            }
        }

        Ok(StreamFlow::Continue)
    }

    fn into_response(self) -> LlmResponse {
        let mut content = Vec::new();

        if !self.text.is_empty() {
            content.push(ContentBlock::Text { text: self.text });
        }

        for (index, call) in self.tool_calls {
            if call.name.is_empty() {
                tracing::warn!(index, "Dropping streamed tool call without a name");
                continue;
            }
            // Unparseable arguments are passed through as a string so the
            // dispatcher reports them instead of silently running with `{}`.
            let input = serde_json::from_str(&call.arguments)
                .unwrap_or(serde_json::Value::String(call.arguments));
            let id = if call.id.is_empty() {
                format!("call_{index}")
            } else {
                call.id
            };
            content.push(ContentBlock::ToolUse {
                id,
                name: call.name,
                input,
            });
        }

        LlmResponse {
            content,
            end_turn: self.finish_reason.as_deref() == Some("stop"),
            usage: self.usage,
        }
    }
}

// OpenAI API types

#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAITool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
    stream_options: StreamOptions,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAIMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAIToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl OpenAIMessage {
    fn plain(role: &str, content: String) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct OpenAITool {
    r#type: String,
    function: OpenAIFunction,
}

#[derive(Debug, Serialize)]
struct OpenAIFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAIToolCall {
    id: String,
    r#type: String,
    function: OpenAIFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAIFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct OpenAIStreamChunk {
    #[serde(default)]
    choices: Vec<OpenAIStreamChoice>,
    #[serde(default)]
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIStreamChoice {
    #[serde(default)]
    delta: OpenAIDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAIDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OpenAIToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct OpenAIToolCallDelta {
    #[serde(default)]
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<OpenAIFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct OpenAIFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
#[allow(clippy::struct_field_names)]
struct OpenAIUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct OpenAIErrorResponse {
    error: OpenAIError,
}

#[derive(Debug, Deserialize)]
struct OpenAIError {
    message: String,
}
