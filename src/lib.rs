//! # mimir-agent
//!
//! A conversational agent runtime that mediates between a human operator, a
//! remote LLM provider, and a smart-home controller. An inbound chat
//! message is attributed to a user, handed to the [`conversation`] manager,
//! and turned into a bounded tool-calling planning loop: the manager calls
//! the configured [`llm`] provider, and if the model asks for a tool, the
//! [`tools`] registry executes it under [`tools::ModeManager`]/
//! [`tools::RateLimiter`] policy before the loop continues. Every message
//! and tool execution is written to the [`db`] audit log; long-term
//! [`db::memory`] facts are summarized back into each turn's system prompt.
//! The [`controller`] module is the smart-home side: an HTTP client for
//! CRUD/query operations and a reconnecting event-bridge socket that feeds
//! inbound operator messages back into the conversation manager.
//!
//! ## Components
//!
//! - **llm** — provider-agnostic adapter (`Complete`/`Stream`) over
//!   Anthropic, OpenAI-compatible (and Azure/Ollama/vLLM by base URL), and
//!   Gemini backends.
//! - **tools** — the tool registry/execution guard, operating-mode state
//!   machine, and sliding-window rate limiter.
//! - **conversation** — per-user history, system-prompt assembly, and the
//!   planning loop.
//! - **controller** — the smart-home controller's HTTP API client and
//!   streaming event bridge.
//! - **db** — the audit log and memory store, both SQLite-backed.
//! - **config** — layered configuration loading (defaults, options file,
//!   environment).
//! - **error** — the crate-wide [`Error`]/[`Result`] type.
//! - **retry** — exponential-backoff retry helper for callers (the binary),
//!   not used internally by the adapters themselves (§4.A: "the adapter
//!   does not retry").

pub mod config;
pub mod controller;
pub mod conversation;
pub mod db;
pub mod error;
pub mod llm;
pub mod retry;
pub mod tools;
pub mod types;

pub use config::{MimirConfig, load_config};
pub use conversation::ConversationManager;
pub use error::{Error, Result};
pub use llm::{LlmProvider, create_provider};
pub use tools::{ModeManager, RateLimiter, Tool, ToolRegistry};
pub use types::{Message, MessageSource, Response, Role, ToolCall, ToolDescriptor, UserContext};

/// Convenience re-exports for the common construction path: load config,
/// build a provider, build the registry, wire up the conversation manager.
pub mod prelude {
    pub use crate::config::{LlmConfig, MimirConfig, OperatingMode, load_config};
    pub use crate::controller::{ControllerApiClient, ControllerEventBridge};
    pub use crate::conversation::ConversationManager;
    pub use crate::db::{AuditRepository, Database, MemoryRepository};
    pub use crate::error::{Error, Result};
    pub use crate::llm::{LlmProvider, create_provider};
    pub use crate::tools::{ModeManager, RateLimiter, Tool, ToolRegistry};
    pub use crate::types::{Message, MessageSource, Response, Role, UserContext};
}
