//! Adapter for OpenAI-compatible chat-completions endpoints.
//!
//! Backs the `OpenAi`, `Azure`, `Ollama`, and `VLlm` provider kinds — they
//! all speak the same wire format and differ only in base URL and key
//! handling, so one adapter serves all four (§4.A, §6). The streaming half
//! ports the teacher SDK's `ToolCallAggregator`: tool-call deltas arrive
//! keyed by index and only become usable once `finish_reason` closes them
//! out.

use std::collections::HashMap;
use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::LlmConfig;
use crate::error::{Error, Result};
use crate::types::{Message, Response, Role, StopReason, StreamChunk, ToolCall, ToolDescriptor, Usage};

use super::{ChunkStream, LlmProvider};

pub struct OpenAiProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl OpenAiProvider {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let base_url = config
            .base_url
            .clone()
            .ok_or_else(|| Error::config("openai-compatible provider requires a base_url"))?;
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(Error::Http)?;
        Ok(Self {
            http,
            base_url,
            api_key: if config.api_key.is_empty() { None } else { Some(config.api_key.clone()) },
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }

    fn build_request(&self, system: &str, messages: &[Message], tools: &[ToolDescriptor], stream: bool) -> WireRequest {
        let mut wire_messages = Vec::with_capacity(messages.len() + 1);
        if !system.is_empty() {
            wire_messages.push(WireMessage {
                role: "system".to_string(),
                content: Some(system.to_string()),
                tool_calls: None,
                tool_call_id: None,
            });
        }
        for m in messages {
            wire_messages.push(to_wire_message(m));
        }

        WireRequest {
            model: self.model.clone(),
            messages: wire_messages,
            stream,
            max_tokens: Some(self.max_tokens),
            temperature: Some(self.temperature),
            tools: if tools.is_empty() {
                None
            } else {
                Some(tools.iter().map(ToolDescriptor::to_openai_format).collect())
            },
        }
    }

    fn post(&self, body: &WireRequest) -> reqwest::RequestBuilder {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let mut req = self.http.post(url).json(body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        req
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, messages: &[Message], tools: &[ToolDescriptor]) -> Result<Response> {
        let mut stream = self.stream(system, messages, tools).await?;
        while let Some(chunk) = stream.next().await {
            if let StreamChunk::Final(response) = chunk? {
                return Ok(response);
            }
        }
        Err(Error::provider("openai", "stream ended without a final chunk"))
    }

    async fn stream(&self, system: &str, messages: &[Message], tools: &[ToolDescriptor]) -> Result<ChunkStream> {
        let body = self.build_request(system, messages, tools, true);
        let response = self.post(&body).send().await.map_err(Error::Http)?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            return Err(Error::provider("openai", format!("http {status}: {text}")));
        }

        let model = self.model.clone();
        let raw = parse_sse_stream(response);
        let mut aggregator = ToolCallAggregator::new();

        let mapped = raw.map(move |chunk_result| {
            let model = model.clone();
            let result = chunk_result.and_then(|chunk| aggregator.process_chunk(chunk, &model));
            let items: Vec<Result<StreamChunk>> = match result {
                Ok(chunks) => chunks.into_iter().map(Ok).collect(),
                Err(e) => vec![Err(e)],
            };
            futures::stream::iter(items)
        });

        let flattened: Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send>> = Box::pin(mapped.flatten());
        Ok(flattened)
    }
}

fn to_wire_message(m: &Message) -> WireMessage {
    match m.role {
        Role::User => WireMessage {
            role: "user".to_string(),
            content: Some(m.content.clone()),
            tool_calls: None,
            tool_call_id: None,
        },
        Role::Assistant => WireMessage {
            role: "assistant".to_string(),
            content: if m.content.is_empty() { None } else { Some(m.content.clone()) },
            tool_calls: if m.tool_calls.is_empty() {
                None
            } else {
                Some(m.tool_calls.iter().map(to_wire_tool_call).collect())
            },
            tool_call_id: None,
        },
        Role::Tool => {
            let result = m.tool_result.as_ref();
            WireMessage {
                role: "tool".to_string(),
                content: Some(result.map(|r| r.content.clone()).unwrap_or_default()),
                tool_calls: None,
                tool_call_id: result.map(|r| r.tool_call_id.clone()),
            }
        }
    }
}

fn to_wire_tool_call(call: &ToolCall) -> WireToolCall {
    WireToolCall {
        id: call.id.clone(),
        call_type: "function".to_string(),
        function: WireFunction {
            name: call.name.clone(),
            arguments: call.arguments.to_string(),
        },
    }
}

#[derive(Debug, Clone, Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Value>>,
}

#[derive(Debug, Clone, Serialize)]
struct WireMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: String,
    function: WireFunction,
}

#[derive(Debug, Clone, Serialize)]
struct WireFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Clone, Deserialize)]
struct WireChunk {
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Clone, Deserialize)]
struct WireChoice {
    delta: WireDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct WireDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCallDelta>>,
}

#[derive(Debug, Clone, Deserialize)]
struct WireToolCallDelta {
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<WireFunctionDelta>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct WireFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

/// Per-index tool-call accumulator. Fields arrive piecemeal: the id and name
/// typically land in the first delta for an index, arguments stream in
/// afterward as JSON-string fragments.
#[derive(Debug, Default)]
struct PartialToolCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

/// Accumulates streamed deltas into [`StreamChunk`]s. One instance per
/// request; not reusable across streams.
struct ToolCallAggregator {
    tool_calls: HashMap<u32, PartialToolCall>,
    usage: Usage,
    content: String,
}

impl ToolCallAggregator {
    fn new() -> Self {
        Self {
            tool_calls: HashMap::new(),
            usage: Usage::default(),
            content: String::new(),
        }
    }

    /// Turns one wire chunk into zero or more [`StreamChunk`]s: a
    /// `DeltaContent` for any text in this chunk, nothing for tool-call
    /// deltas (those only surface once complete), and a trailing `Final`
    /// once `finish_reason` is set.
    fn process_chunk(&mut self, chunk: WireChunk, model: &str) -> Result<Vec<StreamChunk>> {
        let mut out = Vec::new();

        if let Some(usage) = chunk.usage {
            self.usage = Usage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
            };
        }

        let Some(choice) = chunk.choices.into_iter().next() else {
            return Ok(out);
        };

        if let Some(text) = choice.delta.content {
            if !text.is_empty() {
                self.content.push_str(&text);
                out.push(StreamChunk::DeltaContent(text));
            }
        }

        if let Some(deltas) = choice.delta.tool_calls {
            for delta in deltas {
                let entry = self.tool_calls.entry(delta.index).or_default();
                if let Some(id) = delta.id {
                    entry.id = Some(id);
                }
                if let Some(function) = delta.function {
                    if let Some(name) = function.name {
                        entry.name = Some(name);
                    }
                    if let Some(args) = function.arguments {
                        entry.arguments.push_str(&args);
                    }
                }
            }
        }

        if let Some(reason) = choice.finish_reason {
            let stop_reason = match reason.as_str() {
                "tool_calls" => StopReason::ToolUse,
                "length" => StopReason::MaxTokens,
                "stop" => StopReason::EndTurn,
                _ => StopReason::EndTurn,
            };

            let mut tool_calls = Vec::new();
            // Entries missing an id or name are incomplete deltas the API
            // never closed out; silently dropped rather than surfaced as
            // an error.
            for (_, partial) in self.tool_calls.drain() {
                if let (Some(id), Some(name)) = (partial.id, partial.name) {
                    let input: Value = if partial.arguments.is_empty() {
                        serde_json::json!({})
                    } else {
                        serde_json::from_str(&partial.arguments).unwrap_or_else(|_| serde_json::json!({}))
                    };
                    tool_calls.push(ToolCall::new(id, name, input));
                }
            }

            let content = std::mem::take(&mut self.content);
            out.push(StreamChunk::Final(Response {
                content: (!content.is_empty()).then_some(content),
                tool_calls,
                stop_reason,
                usage: self.usage,
                model: model.to_string(),
            }));
        }

        Ok(out)
    }
}

/// Parses an HTTP streaming body into a stream of [`WireChunk`]s, handling
/// the `data: ` SSE framing and the `data: [DONE]` sentinel.
fn parse_sse_stream(body: reqwest::Response) -> Pin<Box<dyn Stream<Item = Result<WireChunk>> + Send>> {
    let stream = body.bytes_stream().filter_map(move |result| async move {
        let bytes = match result.map_err(Error::Http) {
            Ok(b) => b,
            Err(e) => return Some(Err(e)),
        };
        let text = String::from_utf8_lossy(&bytes).into_owned();

        for line in text.lines() {
            if let Some(data) = line.strip_prefix("data: ") {
                if data == "[DONE]" {
                    continue;
                }
                return Some(
                    serde_json::from_str::<WireChunk>(data)
                        .map_err(|e| Error::provider("openai", format!("failed to parse chunk: {e}"))),
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

    fn chunk(content: Option<&str>, finish: Option<&str>) -> WireChunk {
        WireChunk {
            choices: vec![WireChoice {
                delta: WireDelta {
                    content: content.map(str::to_string),
                    tool_calls: None,
                },
                finish_reason: finish.map(str::to_string),
            }],
            usage: None,
        }
    }

    #[test]
    fn aggregates_text_deltas() {
        let mut agg = ToolCallAggregator::new();
        let out1 = agg.process_chunk(chunk(Some("Hello "), None), "m").unwrap();
        assert_eq!(out1.len(), 1);
        let out2 = agg.process_chunk(chunk(Some("world"), Some("stop")), "m").unwrap();
        assert!(matches!(out2.last(), Some(StreamChunk::Final(_))));
    }

    #[test]
    fn final_response_carries_accumulated_text() {
        let mut agg = ToolCallAggregator::new();
        agg.process_chunk(chunk(Some("Hello "), None), "m").unwrap();
        let out = agg.process_chunk(chunk(Some("world"), Some("stop")), "m").unwrap();
        let StreamChunk::Final(response) = out.into_iter().next().unwrap() else {
            panic!("expected final chunk");
        };
        assert_eq!(response.content.as_deref(), Some("Hello world"));
    }

    #[test]
    fn assembles_tool_call_across_deltas() {
        let mut agg = ToolCallAggregator::new();
        let c1 = WireChunk {
            choices: vec![WireChoice {
                delta: WireDelta {
                    content: None,
                    tool_calls: Some(vec![WireToolCallDelta {
                        index: 0,
                        id: Some("call_1".to_string()),
                        function: Some(WireFunctionDelta {
                            name: Some("get_weather".to_string()),
                            arguments: Some("{\"city\":".to_string()),
                        }),
                    }]),
                },
                finish_reason: None,
            }],
            usage: None,
        };
        agg.process_chunk(c1, "m").unwrap();

        let c2 = WireChunk {
            choices: vec![WireChoice {
                delta: WireDelta {
                    content: None,
                    tool_calls: Some(vec![WireToolCallDelta {
                        index: 0,
                        id: None,
                        function: Some(WireFunctionDelta {
                            name: None,
                            arguments: Some("\"Paris\"}".to_string()),
                        }),
                    }]),
                },
                finish_reason: Some("tool_calls".to_string()),
            }],
            usage: None,
        };
        let out = agg.process_chunk(c2, "m").unwrap();
        let StreamChunk::Final(response) = out.into_iter().next().unwrap() else {
            panic!("expected final chunk");
        };
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].name, "get_weather");
        assert_eq!(response.tool_calls[0].arguments["city"], "Paris");
    }

    #[test]
    fn incomplete_tool_call_is_dropped() {
        let mut agg = ToolCallAggregator::new();
        let c = WireChunk {
            choices: vec![WireChoice {
                delta: WireDelta {
                    content: None,
                    tool_calls: Some(vec![WireToolCallDelta {
                        index: 0,
                        id: None,
                        function: Some(WireFunctionDelta {
                            name: None,
                            arguments: Some("{}".to_string()),
                        }),
                    }]),
                },
                finish_reason: Some("stop".to_string()),
            }],
            usage: None,
        };
        let out = agg.process_chunk(c, "m").unwrap();
        let StreamChunk::Final(response) = out.into_iter().next().unwrap() else {
            panic!("expected final chunk");
        };
        assert!(response.tool_calls.is_empty());
    }
}
