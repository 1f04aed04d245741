//! Crate-wide error type.
//!
//! Mirrors the taxonomy of failure kinds the runtime distinguishes (§7):
//! configuration, provider, tool execution, policy, controller API,
//! controller bridge, and persistence errors. One flat enum with `#[from]`
//! conversions for the handful of foreign error types we touch, rather than
//! a type per kind — callers match on `Error` directly when they need to.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Required configuration missing or invalid at startup. Fatal.
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport-level HTTP failure.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// LLM adapter transport or parsing failure.
    #[error("provider error ({provider}): {message}")]
    Provider { provider: String, message: String },

    /// Exception inside a tool handler, or a tool returning an `Error:` string.
    #[error("tool error: {0}")]
    Tool(String),

    /// Mode gate or rate-limit denial.
    #[error("policy error: {0}")]
    Policy(String),

    /// Controller HTTP 4xx/5xx or connection failure.
    #[error("controller API error ({status}): {body}")]
    Api { status: u16, body: String },

    /// Controller event-bridge protocol violation, auth failure, or transport loss.
    #[error("controller bridge error: {0}")]
    Bridge(String),

    /// Database read/write failure in the audit or memory store.
    #[error("persistence error: {0}")]
    Persistence(#[from] rusqlite::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("operation timed out")]
    Timeout,

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn tool(msg: impl Into<String>) -> Self {
        Error::Tool(msg.into())
    }

    pub fn policy(msg: impl Into<String>) -> Self {
        Error::Policy(msg.into())
    }

    pub fn api(status: u16, body: impl Into<String>) -> Self {
        Error::Api {
            status,
            body: body.into(),
        }
    }

    pub fn bridge(msg: impl Into<String>) -> Self {
        Error::Bridge(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    pub fn timeout() -> Self {
        Error::Timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(
            Error::config("missing owner id").to_string(),
            "configuration error: missing owner id"
        );
        assert_eq!(
            Error::provider("anthropic", "bad key").to_string(),
            "provider error (anthropic): bad key"
        );
        assert_eq!(Error::tool("boom").to_string(), "tool error: boom");
        assert_eq!(Error::policy("chat mode").to_string(), "policy error: chat mode");
        assert_eq!(Error::api(404, "not found").to_string(), "controller API error (404): not found");
        assert_eq!(Error::bridge("auth failed").to_string(), "controller bridge error: auth failed");
    }

    #[test]
    fn from_json_error() {
        let bad: std::result::Result<serde_json::Value, _> = serde_json::from_str("{not json");
        let err: Error = bad.unwrap_err().into();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn retryable_timeout_constructor() {
        assert!(matches!(Error::timeout(), Error::Timeout));
    }
}
