//! Core data model shared by every component: messages, tool calls, tool
//! descriptors, provider responses, and the identity/category enums that
//! the mode manager and rate limiter gate on.
//!
//! Provider wire formats (OpenAI chat-completion JSON, Anthropic messages
//! JSON) live in their respective `llm` submodules and convert to/from these
//! shared types at the boundary; nothing in this module knows about any
//! specific vendor.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Who produced a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

/// A single tool invocation requested by the model.
///
/// `id` uniquely pairs this call with its [`ToolResultBlock`] in the same
/// conversation turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// The sentinel prefix that marks a tool result (or a bare error string)
/// as a failure, per §3 and §4.B of the spec this crate implements.
pub const ERROR_PREFIX: &str = "Error:";

/// Result of executing one [`ToolCall`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultBlock {
    pub tool_call_id: String,
    pub content: String,
    pub is_error: bool,
}

impl ToolResultBlock {
    /// `is_error` is derived from the content, not passed separately:
    /// a result is an error iff it starts with `"Error:"`.
    pub fn new(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let content = content.into();
        let is_error = content.starts_with(ERROR_PREFIX);
        Self {
            tool_call_id: tool_call_id.into(),
            content,
            is_error,
        }
    }
}

/// One turn in a conversation.
///
/// An assistant turn carries text content, one or more `tool_calls`, or
/// both. A tool turn carries exactly one [`ToolResultBlock`] answering a
/// single prior tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<ToolResultBlock>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: text.into(),
            tool_calls: Vec::new(),
            tool_result: None,
        }
    }

    pub fn assistant(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls,
            tool_result: None,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: String::new(),
            tool_calls: Vec::new(),
            tool_result: Some(ToolResultBlock::new(tool_call_id, content)),
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// True for assistant turns that are pure tool-call carriers (no text),
    /// used by history retrieval to hide internal planning-loop turns from
    /// chat-facing views.
    pub fn is_tool_use_only(&self) -> bool {
        self.role == Role::Assistant && self.content.is_empty() && self.has_tool_calls()
    }
}

/// A named, typed capability exposed to the model. `parameters` is a
/// JSON-Schema object describing the arguments; registries key tools by
/// `name` and registering a duplicate overwrites the prior entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    /// `{type: "function", function: {name, description, parameters}}`, the
    /// shape OpenAI-compatible chat-completions endpoints expect.
    pub fn to_openai_format(&self) -> Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }

    /// `{name, description, input_schema}`, Anthropic's native tool form.
    pub fn to_anthropic_format(&self) -> Value {
        serde_json::json!({
            "name": self.name,
            "description": self.description,
            "input_schema": self.parameters,
        })
    }
}

/// Why a provider stopped generating, normalized across vendors (§4.A rule 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    StopSequence,
}

/// Token accounting, zeroed when a provider doesn't report usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl Usage {
    pub fn total_tokens(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// A completed provider turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    pub stop_reason: StopReason,
    pub usage: Usage,
    pub model: String,
}

impl Response {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// One increment of a streamed provider response. A stream always ends with
/// exactly one `Final` chunk carrying the assembled [`Response`].
#[derive(Debug, Clone)]
pub enum StreamChunk {
    DeltaContent(String),
    DeltaToolCall(ToolCall),
    Final(Response),
}

/// Where an inbound message originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageSource {
    Bot,
    Web,
    Unknown,
}

impl std::fmt::Display for MessageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageSource::Bot => write!(f, "bot"),
            MessageSource::Web => write!(f, "web"),
            MessageSource::Unknown => write!(f, "unknown"),
        }
    }
}

/// Identity of the human behind an inbound message. Derived per message,
/// never persisted on its own; `user_id` is the partition key for history,
/// audit, and chat-UI filtering.
#[derive(Debug, Clone)]
pub struct UserContext {
    pub user_id: String,
    pub username: Option<String>,
    pub display_name: Option<String>,
    pub source: MessageSource,
}

impl UserContext {
    pub fn new(user_id: impl Into<String>, source: MessageSource) -> Self {
        Self {
            user_id: user_id.into(),
            username: None,
            display_name: None,
            source,
        }
    }

    /// Best available human-readable label: display name, then username,
    /// then the raw id.
    pub fn friendly_name(&self) -> &str {
        self.display_name
            .as_deref()
            .or(self.username.as_deref())
            .unwrap_or(&self.user_id)
    }
}

/// Governs mode gating (§4.C) and rate-limit category (§4.D) for a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    ReadOnly,
    Write,
    Destructive,
}

/// Category of a long-term memory, per §3. Kept as the single canonical
/// enum, since two call sites in the originating implementation categorized
/// memories slightly differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryCategory {
    UserPreference,
    DeviceInfo,
    AutomationNote,
    HomeLayout,
    Routine,
    General,
}

impl MemoryCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryCategory::UserPreference => "user_preference",
            MemoryCategory::DeviceInfo => "device_info",
            MemoryCategory::AutomationNote => "automation_note",
            MemoryCategory::HomeLayout => "home_layout",
            MemoryCategory::Routine => "routine",
            MemoryCategory::General => "general",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user_preference" => Some(MemoryCategory::UserPreference),
            "device_info" => Some(MemoryCategory::DeviceInfo),
            "automation_note" => Some(MemoryCategory::AutomationNote),
            "home_layout" => Some(MemoryCategory::HomeLayout),
            "routine" => Some(MemoryCategory::Routine),
            "general" => Some(MemoryCategory::General),
            _ => None,
        }
    }
}

/// Audit entry type, per §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    User,
    Assistant,
    Tool,
    Error,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::User => "user",
            MessageType::Assistant => "assistant",
            MessageType::Tool => "tool",
            MessageType::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(MessageType::User),
            "assistant" => Some(MessageType::Assistant),
            "tool" => Some(MessageType::Tool),
            "error" => Some(MessageType::Error),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_user_roundtrip() {
        let m = Message::user("hi there");
        assert_eq!(m.content, "hi there");
        assert_eq!(m.role, Role::User);
        assert!(!m.has_tool_calls());
    }

    #[test]
    fn assistant_has_tool_calls_iff_nonempty() {
        let none = Message::assistant("done", vec![]);
        assert!(!none.has_tool_calls());

        let with_call = Message::assistant(
            "",
            vec![ToolCall::new("c1", "mock", serde_json::json!({}))],
        );
        assert!(with_call.has_tool_calls());
        assert!(with_call.is_tool_use_only());
    }

    #[test]
    fn tool_result_error_detection() {
        let ok = Message::tool_result("c1", "42 degrees");
        assert!(!ok.tool_result.unwrap().is_error);

        let err = Message::tool_result("c1", "Error: entity not found");
        assert!(err.tool_result.unwrap().is_error);
    }

    #[test]
    fn response_has_tool_calls() {
        let resp = Response {
            content: None,
            tool_calls: vec![ToolCall::new("c1", "x", serde_json::json!({}))],
            stop_reason: StopReason::ToolUse,
            usage: Usage::default(),
            model: "test-model".into(),
        };
        assert!(resp.has_tool_calls());
    }

    #[test]
    fn usage_total() {
        let u = Usage {
            input_tokens: 10,
            output_tokens: 5,
        };
        assert_eq!(u.total_tokens(), 15);
    }

    #[test]
    fn memory_category_roundtrip() {
        for cat in [
            MemoryCategory::UserPreference,
            MemoryCategory::DeviceInfo,
            MemoryCategory::AutomationNote,
            MemoryCategory::HomeLayout,
            MemoryCategory::Routine,
            MemoryCategory::General,
        ] {
            assert_eq!(MemoryCategory::parse(cat.as_str()), Some(cat));
        }
    }

    #[test]
    fn tool_descriptor_formats() {
        let t = ToolDescriptor::new("get_entities", "list entities", serde_json::json!({"type":"object"}));
        let openai = t.to_openai_format();
        assert_eq!(openai["type"], "function");
        assert_eq!(openai["function"]["name"], "get_entities");

        let anthropic = t.to_anthropic_format();
        assert_eq!(anthropic["name"], "get_entities");
        assert!(anthropic.get("input_schema").is_some());
    }
}
