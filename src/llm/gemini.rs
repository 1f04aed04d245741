//! Best-effort adapter for Google's Gemini REST API.
//!
//! Gemini is an optional provider (§6); this adapter covers non-streaming
//! completion and function calling, grounded on `llm/gemini.py`'s message
//! and tool conversion. True incremental streaming is not implemented —
//! `stream()` issues one blocking completion and replays it as a single
//! `Final` chunk, which is sufficient for the planning loop (§4.A) since it
//! only ever inspects the final chunk's tool calls and stop reason.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::LlmConfig;
use crate::error::{Error, Result};
use crate::types::{Message, Response, Role, StopReason, StreamChunk, ToolCall, ToolDescriptor, Usage};

use super::{ChunkStream, LlmProvider};

const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiProvider {
    http: reqwest::Client,
    api_key: String,
    model: String,
    temperature: f32,
}

impl GeminiProvider {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(Error::config("gemini provider requires an api key"));
        }
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(Error::Http)?;
        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, messages: &[Message], tools: &[ToolDescriptor]) -> Result<Response> {
        let body = WireRequest {
            contents: messages.iter().filter_map(to_wire_content).collect(),
            system_instruction: if system.is_empty() {
                None
            } else {
                Some(WireContent {
                    role: "user".to_string(),
                    parts: vec![WirePart::Text { text: system.to_string() }],
                })
            },
            tools: if tools.is_empty() { None } else { Some(vec![to_wire_tools(tools)]) },
            generation_config: WireGenerationConfig {
                temperature: self.temperature,
            },
        };

        let url = format!(
            "{}/models/{}:generateContent?key={}",
            BASE_URL, self.model, self.api_key
        );
        let resp = self.http.post(url).json(&body).send().await.map_err(Error::Http)?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::provider("gemini", format!("http {status}: {text}")));
        }

        let wire: WireResponse = resp.json().await.map_err(Error::Http)?;
        parse_response(wire, &self.model)
    }

    async fn stream(&self, system: &str, messages: &[Message], tools: &[ToolDescriptor]) -> Result<ChunkStream> {
        let response = self.complete(system, messages, tools).await?;
        Ok(Box::pin(futures::stream::once(async move { Ok(StreamChunk::Final(response)) })))
    }
}

fn to_wire_content(m: &Message) -> Option<WireContent> {
    match m.role {
        Role::User => Some(WireContent {
            role: "user".to_string(),
            parts: vec![WirePart::Text { text: m.content.clone() }],
        }),
        Role::Tool => {
            let result = m.tool_result.as_ref()?;
            Some(WireContent {
                role: "user".to_string(),
                parts: vec![WirePart::FunctionResponse {
                    function_response: WireFunctionResponse {
                        name: result.tool_call_id.clone(),
                        response: serde_json::json!({"result": result.content}),
                    },
                }],
            })
        }
        Role::Assistant => {
            let mut parts = Vec::new();
            if !m.content.is_empty() {
                parts.push(WirePart::Text { text: m.content.clone() });
            }
            for call in &m.tool_calls {
                parts.push(WirePart::FunctionCall {
                    function_call: WireFunctionCall {
                        name: call.name.clone(),
                        args: call.arguments.clone(),
                    },
                });
            }
            if parts.is_empty() {
                None
            } else {
                Some(WireContent { role: "model".to_string(), parts })
            }
        }
    }
}

fn to_wire_tools(tools: &[ToolDescriptor]) -> WireToolDeclaration {
    WireToolDeclaration {
        function_declarations: tools
            .iter()
            .map(|t| WireFunctionDeclaration {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.parameters.clone(),
            })
            .collect(),
    }
}

fn parse_response(wire: WireResponse, model: &str) -> Result<Response> {
    let candidate = wire
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| Error::provider("gemini", "response had no candidates"))?;

    let mut content = None;
    let mut tool_calls = Vec::new();

    for part in candidate.content.parts {
        match part {
            WirePart::Text { text } => content = Some(text),
            WirePart::FunctionCall { function_call } => {
                let id = format!("gemini-call-{}", tool_calls.len());
                tool_calls.push(ToolCall::new(id, function_call.name, function_call.args));
            }
            WirePart::FunctionResponse { .. } => {}
        }
    }

    let stop_reason = match candidate.finish_reason.as_deref() {
        Some("MAX_TOKENS") => StopReason::MaxTokens,
        _ if !tool_calls.is_empty() => StopReason::ToolUse,
        _ => StopReason::EndTurn,
    };

    Ok(Response {
        content,
        tool_calls,
        stop_reason,
        usage: wire
            .usage_metadata
            .map(|u| Usage {
                input_tokens: u.prompt_token_count,
                output_tokens: u.candidates_token_count,
            })
            .unwrap_or_default(),
        model: model.to_string(),
    })
}

#[derive(Debug, Clone, Serialize)]
struct WireRequest {
    contents: Vec<WireContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<WireContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireToolDeclaration>>,
    generation_config: WireGenerationConfig,
}

#[derive(Debug, Clone, Serialize)]
struct WireGenerationConfig {
    temperature: f32,
}

#[derive(Debug, Clone, Serialize)]
struct WireToolDeclaration {
    function_declarations: Vec<WireFunctionDeclaration>,
}

#[derive(Debug, Clone, Serialize)]
struct WireFunctionDeclaration {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireContent {
    role: String,
    parts: Vec<WirePart>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum WirePart {
    FunctionCall {
        #[serde(rename = "functionCall")]
        function_call: WireFunctionCall,
    },
    FunctionResponse {
        #[serde(rename = "functionResponse")]
        function_response: WireFunctionResponse,
    },
    Text {
        text: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    args: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireFunctionResponse {
    name: String,
    response: Value,
}

#[derive(Debug, Clone, Deserialize)]
struct WireResponse {
    candidates: Vec<WireCandidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<WireUsageMetadata>,
}

#[derive(Debug, Clone, Deserialize)]
struct WireCandidate {
    content: WireContent,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
struct WireUsageMetadata {
    #[serde(rename = "promptTokenCount", default)]
    prompt_token_count: u32,
    #[serde(rename = "candidatesTokenCount", default)]
    candidates_token_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_text_response() {
        let wire = WireResponse {
            candidates: vec![WireCandidate {
                content: WireContent {
                    role: "model".to_string(),
                    parts: vec![WirePart::Text { text: "hi there".to_string() }],
                },
                finish_reason: Some("STOP".to_string()),
            }],
            usage_metadata: Some(WireUsageMetadata {
                prompt_token_count: 5,
                candidates_token_count: 2,
            }),
        };
        let resp = parse_response(wire, "gemini-1.5-pro").unwrap();
        assert_eq!(resp.content.as_deref(), Some("hi there"));
        assert_eq!(resp.stop_reason, StopReason::EndTurn);
        assert_eq!(resp.usage.total_tokens(), 7);
    }
}
