//! OpenAI-compatible `/chat/completions` client with SSE streaming.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::{
    AgentError, ChatRequest, ChatResponse, LlmClient, Message, MessageRole, StreamDeltaHandler,
    ToolCall, ToolDefinition,
};

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 120_000;

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_base: String,
    pub api_key: String,
    pub request_timeout_ms: u64,
}

/// Public struct `OpenAiClient` speaking the chat-completions protocol.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    client: reqwest::Client,
    config: OpenAiConfig,
}

impl OpenAiClient {
    pub fn new(config: OpenAiConfig) -> Result<Self, AgentError> {
        if config.api_key.trim().is_empty() {
            return Err(AgentError::MissingApiKey);
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let bearer = format!("Bearer {}", config.api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&bearer).map_err(|error| {
                AgentError::InvalidResponse(format!("invalid API key header: {error}"))
            })?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(config.request_timeout_ms.max(1)))
            .build()?;

        Ok(Self { client, config })
    }

    fn chat_completions_url(&self) -> String {
        let base = self.config.api_base.trim_end_matches('/');
        if base.ends_with("/chat/completions") {
            return base.to_string();
        }
        format!("{base}/chat/completions")
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(
        &self,
        request: ChatRequest,
        on_delta: Option<StreamDeltaHandler>,
    ) -> Result<ChatResponse, AgentError> {
        let mut body = build_chat_request_body(&request);
        if on_delta.is_some() {
            body["stream"] = json!(true);
        }
        let url = self.chat_completions_url();
        debug!(%url, model = %request.model, messages = request.messages.len(), "sending chat request");

        let response = self.client.post(&url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await?;
            return Err(AgentError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        let Some(on_delta) = on_delta else {
            let raw = response.text().await?;
            return parse_chat_response(&raw);
        };
        let is_event_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_ascii_lowercase().contains("text/event-stream"))
            .unwrap_or(false);
        if is_event_stream {
            return parse_chat_stream_response(response, on_delta).await;
        }

        // Some compatible servers ignore `stream`; replay the whole text as one delta.
        let raw = response.text().await?;
        let parsed = parse_chat_response(&raw)?;
        let text = parsed.message.text_content();
        if !text.is_empty() {
            on_delta(text.to_string());
        }
        Ok(parsed)
    }
}

fn build_chat_request_body(request: &ChatRequest) -> Value {
    let mut body = json!({
        "model": request.model,
        "messages": to_openai_messages(&request.messages),
    });
    if !request.tools.is_empty() {
        body["tools"] = to_openai_tools(&request.tools);
    }
    body
}

fn to_openai_tools(tools: &[ToolDefinition]) -> Value {
    Value::Array(
        tools
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.parameters,
                    }
                })
            })
            .collect(),
    )
}

fn to_openai_messages(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|message| match message.role {
            MessageRole::System => json!({ "role": "system", "content": message.text_content() }),
            MessageRole::User => json!({ "role": "user", "content": message.text_content() }),
            MessageRole::Assistant if message.tool_calls.is_empty() => {
                json!({ "role": "assistant", "content": message.text_content() })
            }
            MessageRole::Assistant => {
                let tool_calls = message
                    .tool_calls
                    .iter()
                    .map(|call| {
                        json!({
                            "id": call.id,
                            "type": "function",
                            "function": {
                                "name": call.name,
                                "arguments": stringify_tool_arguments(&call.arguments),
                            }
                        })
                    })
                    .collect::<Vec<_>>();
                json!({
                    "role": "assistant",
                    "content": message.content,
                    "tool_calls": tool_calls,
                })
            }
            MessageRole::Tool => json!({
                "role": "tool",
                "tool_call_id": message.tool_call_id,
                "content": message.text_content(),
            }),
        })
        .collect()
}

fn stringify_tool_arguments(arguments: &Value) -> String {
    match arguments {
        Value::String(value) => value.clone(),
        value => value.to_string(),
    }
}

fn parse_tool_arguments(arguments: String) -> Value {
    if arguments.trim().is_empty() {
        return json!({});
    }
    serde_json::from_str::<Value>(&arguments).unwrap_or(Value::String(arguments))
}

fn parse_chat_response(raw: &str) -> Result<ChatResponse, AgentError> {
    let parsed: OpenAiChatResponse = serde_json::from_str(raw)?;
    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| AgentError::InvalidResponse("response contained no choices".to_string()))?;

    let tool_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .filter(|call| call.call_type.as_deref().unwrap_or("function") == "function")
        .map(|call| ToolCall {
            id: call.id,
            name: call.function.name,
            arguments: parse_tool_arguments(call.function.arguments),
        })
        .collect();

    Ok(ChatResponse {
        message: Message::assistant_with_tool_calls(choice.message.content, tool_calls),
        finish_reason: choice.finish_reason,
    })
}

async fn parse_chat_stream_response(
    response: reqwest::Response,
    on_delta: StreamDeltaHandler,
) -> Result<ChatResponse, AgentError> {
    let mut stream = response.bytes_stream();
    let mut pending = Vec::<u8>::new();
    let mut state = StreamState::default();

    while let Some(chunk) = stream.next().await {
        pending.extend_from_slice(chunk?.as_ref());
        // Split on raw bytes so a multi-byte character cut across chunks survives.
        while let Some(pos) = pending.iter().position(|byte| *byte == b'\n') {
            let line_bytes = pending.drain(..=pos).collect::<Vec<_>>();
            let line = std::str::from_utf8(&line_bytes).map_err(|error| {
                AgentError::InvalidResponse(format!("invalid UTF-8 in streaming response: {error}"))
            })?;
            if state.apply_line(line.trim(), &on_delta)? {
                return Ok(state.finish());
            }
        }
    }

    let trailing = String::from_utf8_lossy(&pending).trim().to_string();
    if !trailing.is_empty() {
        state.apply_line(&trailing, &on_delta)?;
    }
    Ok(state.finish())
}

#[derive(Debug, Default)]
struct StreamState {
    text: String,
    tool_calls: Vec<ToolCallAccumulator>,
    finish_reason: Option<String>,
}

#[derive(Debug, Default)]
struct ToolCallAccumulator {
    id: String,
    name: String,
    arguments: String,
}

impl StreamState {
    /// Applies one SSE line; returns `true` on the `[DONE]` sentinel.
    fn apply_line(&mut self, line: &str, on_delta: &StreamDeltaHandler) -> Result<bool, AgentError> {
        let Some(data) = line.strip_prefix("data:") else {
            return Ok(false);
        };
        let data = data.trim();
        if data == "[DONE]" {
            return Ok(true);
        }
        if data.is_empty() {
            return Ok(false);
        }
        let chunk: OpenAiStreamChunk = serde_json::from_str(data).map_err(|error| {
            AgentError::InvalidResponse(format!("failed to parse stream chunk: {error}"))
        })?;

        for choice in chunk.choices {
            if let Some(reason) = choice.finish_reason {
                self.finish_reason = Some(reason);
            }
            let Some(delta) = choice.delta else {
                continue;
            };
            if let Some(text) = delta.content.filter(|text| !text.is_empty()) {
                self.text.push_str(&text);
                on_delta(text);
            }
            for call in delta.tool_calls.unwrap_or_default() {
                if self.tool_calls.len() <= call.index {
                    self.tool_calls
                        .resize_with(call.index + 1, ToolCallAccumulator::default);
                }
                let current = &mut self.tool_calls[call.index];
                if let Some(id) = call.id.filter(|id| !id.is_empty()) {
                    current.id = id;
                }
                if let Some(function) = call.function {
                    if let Some(name) = function.name.filter(|name| !name.is_empty()) {
                        current.name = name;
                    }
                    if let Some(arguments) = function.arguments {
                        current.arguments.push_str(&arguments);
                    }
                }
            }
        }
        Ok(false)
    }

    fn finish(self) -> ChatResponse {
        let tool_calls = self
            .tool_calls
            .into_iter()
            .enumerate()
            .filter(|(_, call)| !call.name.trim().is_empty())
            .map(|(index, call)| ToolCall {
                id: if call.id.trim().is_empty() {
                    format!("stream_tool_call_{}", index + 1)
                } else {
                    call.id
                },
                name: call.name,
                arguments: parse_tool_arguments(call.arguments),
            })
            .collect();
        ChatResponse {
            message: Message::assistant_with_tool_calls(Some(self.text), tool_calls),
            finish_reason: self.finish_reason,
        }
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoiceMessage {
    content: Option<String>,
    tool_calls: Option<Vec<OpenAiToolCall>>,
}

#[derive(Debug, Deserialize)]
struct OpenAiToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: Option<String>,
    function: OpenAiFunctionCall,
}

#[derive(Debug, Deserialize)]
struct OpenAiFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChunk {
    #[serde(default)]
    choices: Vec<OpenAiStreamChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChoice {
    delta: Option<OpenAiStreamDelta>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamDelta {
    content: Option<String>,
    tool_calls: Option<Vec<OpenAiStreamToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamToolCallDelta {
    index: usize,
    id: Option<String>,
    function: Option<OpenAiStreamFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamFunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}
