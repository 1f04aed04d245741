//! Adapter for Anthropic's Messages API.
//!
//! Grounded on `llm/anthropic.py`'s message/tool conversion and stop-reason
//! mapping; the teacher has no Anthropic-specific code, so the HTTP/SSE
//! transport follows the same `reqwest` streaming shape `openai.rs` uses
//! rather than a vendor SDK.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::LlmConfig;
use crate::error::{Error, Result};
use crate::types::{Message, Response, Role, StopReason, StreamChunk, ToolCall, ToolDescriptor, Usage};

use super::{ChunkStream, LlmProvider};

const API_VERSION: &str = "2023-06-01";
const BASE_URL: &str = "https://api.anthropic.com/v1";

pub struct AnthropicProvider {
    http: reqwest::Client,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl AnthropicProvider {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(Error::config("anthropic provider requires an api key"));
        }
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(Error::Http)?;
        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }

    fn base_url(&self) -> &str {
        BASE_URL
    }

    fn build_request(&self, system: &str, messages: &[Message], tools: &[ToolDescriptor], stream: bool) -> WireRequest {
        WireRequest {
            model: self.model.clone(),
            messages: messages.iter().map(to_wire_message).collect(),
            max_tokens: self.max_tokens,
            temperature: Some(self.temperature),
            system: if system.is_empty() { None } else { Some(system.to_string()) },
            tools: if tools.is_empty() {
                None
            } else {
                Some(tools.iter().map(ToolDescriptor::to_anthropic_format).collect())
            },
            stream,
        }
    }

    fn post(&self, body: &WireRequest) -> reqwest::RequestBuilder {
        self.http
            .post(format!("{}/messages", self.base_url()))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(body)
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, messages: &[Message], tools: &[ToolDescriptor]) -> Result<Response> {
        let body = self.build_request(system, messages, tools, false);
        let resp = self.post(&body).send().await.map_err(Error::Http)?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::provider("anthropic", format!("http {status}: {text}")));
        }

        let wire: WireResponse = resp.json().await.map_err(Error::Http)?;
        Ok(parse_response(wire))
    }

    async fn stream(&self, system: &str, messages: &[Message], tools: &[ToolDescriptor]) -> Result<ChunkStream> {
        let body = self.build_request(system, messages, tools, true);
        let resp = self.post(&body).send().await.map_err(Error::Http)?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::provider("anthropic", format!("http {status}: {text}")));
        }

        let model = self.model.clone();
        let events = parse_sse_events(resp);
        let state = AnthropicStreamState::new(model);

        let mapped = events.scan(state, |state, event_result| {
            let out = event_result.and_then(|event| state.process_event(event));
            async move { Some(out) }
        });

        let flattened: Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send>> =
            Box::pin(mapped.flat_map(|result| {
                let items: Vec<Result<StreamChunk>> = match result {
                    Ok(chunks) => chunks.into_iter().map(Ok).collect(),
                    Err(e) => vec![Err(e)],
                };
                futures::stream::iter(items)
            }));
        Ok(flattened)
    }
}

fn to_wire_message(m: &Message) -> WireMessage {
    match m.role {
        Role::User => {
            if let Some(result) = &m.tool_result {
                WireMessage {
                    role: "user".to_string(),
                    content: vec![WireContentBlock::ToolResult {
                        tool_use_id: result.tool_call_id.clone(),
                        content: result.content.clone(),
                        is_error: result.is_error,
                    }],
                }
            } else {
                WireMessage {
                    role: "user".to_string(),
                    content: vec![WireContentBlock::Text { text: m.content.clone() }],
                }
            }
        }
        Role::Tool => {
            let result = m.tool_result.as_ref();
            WireMessage {
                role: "user".to_string(),
                content: vec![WireContentBlock::ToolResult {
                    tool_use_id: result.map(|r| r.tool_call_id.clone()).unwrap_or_default(),
                    content: result.map(|r| r.content.clone()).unwrap_or_default(),
                    is_error: result.map(|r| r.is_error).unwrap_or(false),
                }],
            }
        }
        Role::Assistant => {
            let mut content = Vec::new();
            if !m.content.is_empty() {
                content.push(WireContentBlock::Text { text: m.content.clone() });
            }
            for call in &m.tool_calls {
                content.push(WireContentBlock::ToolUse {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    input: call.arguments.clone(),
                });
            }
            WireMessage {
                role: "assistant".to_string(),
                content,
            }
        }
    }
}

fn parse_response(wire: WireResponse) -> Response {
    let mut content = None;
    let mut tool_calls = Vec::new();

    for block in wire.content {
        match block {
            WireContentBlock::Text { text } => content = Some(text),
            WireContentBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall::new(id, name, input)),
            WireContentBlock::ToolResult { .. } => {}
        }
    }

    let stop_reason = match wire.stop_reason.as_deref() {
        Some("tool_use") => StopReason::ToolUse,
        Some("max_tokens") => StopReason::MaxTokens,
        Some("stop_sequence") => StopReason::StopSequence,
        _ => StopReason::EndTurn,
    };

    Response {
        content,
        tool_calls,
        stop_reason,
        usage: Usage {
            input_tokens: wire.usage.input_tokens,
            output_tokens: wire.usage.output_tokens,
        },
        model: wire.model,
    }
}

#[derive(Debug, Clone, Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Value>>,
    stream: bool,
}

#[derive(Debug, Clone, Serialize)]
struct WireMessage {
    role: String,
    content: Vec<WireContentBlock>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        is_error: bool,
    },
}

#[derive(Debug, Clone, Deserialize)]
struct WireResponse {
    content: Vec<WireContentBlock>,
    stop_reason: Option<String>,
    usage: WireUsage,
    model: String,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
struct WireUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

/// One parsed SSE event from the Messages streaming API, tagged by `type`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
enum WireEvent {
    #[serde(rename = "content_block_start")]
    ContentBlockStart { content_block: WireBlockStart },
    #[serde(rename = "content_block_delta")]
    ContentBlockDelta { delta: WireDelta },
    #[serde(rename = "content_block_stop")]
    ContentBlockStop {},
    #[serde(rename = "message_delta")]
    MessageDelta { delta: WireMessageDelta, usage: Option<WireUsage> },
    #[serde(rename = "message_stop")]
    MessageStop {},
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireBlockStart {
    Text { text: String },
    ToolUse { id: String, name: String },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
enum WireDelta {
    #[serde(rename = "text_delta")]
    TextDelta { text: String },
    #[serde(rename = "input_json_delta")]
    InputJsonDelta { partial_json: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct WireMessageDelta {
    stop_reason: Option<String>,
}

struct AnthropicStreamState {
    model: String,
    current_tool: Option<(String, String)>,
    accumulated_json: String,
    stop_reason: StopReason,
    usage: Usage,
}

impl AnthropicStreamState {
    fn new(model: String) -> Self {
        Self {
            model,
            current_tool: None,
            accumulated_json: String::new(),
            stop_reason: StopReason::EndTurn,
            usage: Usage::default(),
        }
    }

    fn process_event(&mut self, event: WireEvent) -> Result<Vec<StreamChunk>> {
        let mut out = Vec::new();
        match event {
            WireEvent::ContentBlockStart {
                content_block: WireBlockStart::ToolUse { id, name },
            } => {
                self.current_tool = Some((id, name));
                self.accumulated_json.clear();
            }
            WireEvent::ContentBlockStart { .. } => {}
            WireEvent::ContentBlockDelta {
                delta: WireDelta::TextDelta { text },
            } => {
                out.push(StreamChunk::DeltaContent(text));
            }
            WireEvent::ContentBlockDelta {
                delta: WireDelta::InputJsonDelta { partial_json },
            } => {
                self.accumulated_json.push_str(&partial_json);
            }
            WireEvent::ContentBlockDelta { .. } => {}
            WireEvent::ContentBlockStop {} => {
                if let Some((id, name)) = self.current_tool.take() {
                    let input: Value = if self.accumulated_json.is_empty() {
                        serde_json::json!({})
                    } else {
                        serde_json::from_str(&self.accumulated_json).unwrap_or_else(|_| serde_json::json!({}))
                    };
                    out.push(StreamChunk::DeltaToolCall(ToolCall::new(id, name, input)));
                }
            }
            WireEvent::MessageDelta { delta, usage } => {
                if let Some(reason) = delta.stop_reason {
                    self.stop_reason = match reason.as_str() {
                        "tool_use" => StopReason::ToolUse,
                        "max_tokens" => StopReason::MaxTokens,
                        "stop_sequence" => StopReason::StopSequence,
                        _ => StopReason::EndTurn,
                    };
                }
                if let Some(u) = usage {
                    self.usage.output_tokens = u.output_tokens;
                }
            }
            WireEvent::MessageStop {} => {
                out.push(StreamChunk::Final(Response {
                    content: None,
                    tool_calls: Vec::new(),
                    stop_reason: self.stop_reason,
                    usage: self.usage,
                    model: self.model.clone(),
                }));
            }
            WireEvent::Other => {}
        }
        Ok(out)
    }
}

/// Parses the `event: ...\ndata: {...}` SSE framing Anthropic's streaming
/// API uses into [`WireEvent`]s, ignoring `event:` lines (the `type` field
/// inside `data:` is sufficient to dispatch).
fn parse_sse_events(resp: reqwest::Response) -> Pin<Box<dyn Stream<Item = Result<WireEvent>> + Send>> {
    let stream = resp.bytes_stream().filter_map(move |result| async move {
        let bytes = match result.map_err(Error::Http) {
            Ok(b) => b,
            Err(e) => return Some(Err(e)),
        };
        let text = String::from_utf8_lossy(&bytes).into_owned();

        for line in text.lines() {
            if let Some(data) = line.strip_prefix("data: ") {
                return Some(
                    serde_json::from_str::<WireEvent>(data)
                        .map_err(|e| Error::provider("anthropic", format!("failed to parse event: {e}"))),
                );
            }
        }
        None
    });

    Box::pin(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_stop_sequence() {
        let wire = WireResponse {
            content: vec![WireContentBlock::Text { text: "hi".into() }],
            stop_reason: Some("stop_sequence".to_string()),
            usage: WireUsage { input_tokens: 3, output_tokens: 4 },
            model: "claude-sonnet-4-5".into(),
        };
        let resp = parse_response(wire);
        assert_eq!(resp.stop_reason, StopReason::StopSequence);
        assert_eq!(resp.content.as_deref(), Some("hi"));
    }

    #[test]
    fn parses_tool_use_block() {
        let wire = WireResponse {
            content: vec![WireContentBlock::ToolUse {
                id: "call_1".into(),
                name: "get_entities".into(),
                input: serde_json::json!({"domain": "light"}),
            }],
            stop_reason: Some("tool_use".to_string()),
            usage: WireUsage::default(),
            model: "claude-sonnet-4-5".into(),
        };
        let resp = parse_response(wire);
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].name, "get_entities");
        assert_eq!(resp.stop_reason, StopReason::ToolUse);
    }

    #[test]
    fn stream_state_assembles_tool_call_on_block_stop() {
        let mut state = AnthropicStreamState::new("m".to_string());
        state
            .process_event(WireEvent::ContentBlockStart {
                content_block: WireBlockStart::ToolUse { id: "c1".into(), name: "fn".into() },
            })
            .unwrap();
        state
            .process_event(WireEvent::ContentBlockDelta {
                delta: WireDelta::InputJsonDelta { partial_json: "{\"x\":1}".into() },
            })
            .unwrap();
        let out = state.process_event(WireEvent::ContentBlockStop {}).unwrap();
        match &out[0] {
            StreamChunk::DeltaToolCall(call) => {
                assert_eq!(call.name, "fn");
                assert_eq!(call.arguments["x"], 1);
            }
            _ => panic!("expected tool call delta"),
        }
    }
}
