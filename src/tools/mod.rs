//! Tool registry and execution guard (§4.B).
//!
//! [`ToolRegistry`] is the single chokepoint every tool call passes
//! through: it looks the tool up by name, consults the [`ModeManager`]
//! and [`RateLimiter`] bound to it, times the call, captures failures into
//! the `"Error: ..."` sentinel convention (§3), and fires an optional
//! execution callback exactly once per call. Grounded on
//! `tools/registry.py`'s `ToolRegistry.execute`.

pub mod ha_tools;
pub mod memory_tools;
pub mod mode;
pub mod rate_limiter;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::types::ToolDescriptor;

pub use mode::{ModeManager, tool_category};
pub use rate_limiter::{OperationType, RateLimitStatus, RateLimiter, operation_type};

/// A named, typed capability the LLM can invoke. `execute` receives the
/// raw JSON arguments map the model supplied and returns a plain string —
/// the sentinel `"Error:"` prefix (§3) is the only structured signal a
/// tool communicates back through its return value.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters(&self) -> Value;

    async fn execute(&self, arguments: Value) -> Result<String, String>;

    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(self.name(), self.description(), self.parameters())
    }
}

/// Called once per [`ToolRegistry::execute`], whether the call succeeded
/// or failed. `(name, arguments, result, duration_ms, success, error)`.
pub type ExecutionCallback =
    Box<dyn Fn(&str, &Value, &str, i64, bool, Option<&str>) -> futures::future::BoxFuture<'static, ()> + Send + Sync>;

/// Registry of every tool the conversation manager may offer the model.
/// Registering a duplicate name overwrites the prior entry (logged as a
/// warning), matching §3's descriptor-uniqueness rule.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    mode_manager: Option<Arc<ModeManager>>,
    rate_limiter: Option<Arc<RateLimiter>>,
    rate_limiting_enabled: std::sync::atomic::AtomicBool,
    on_execute: Option<ExecutionCallback>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            mode_manager: None,
            rate_limiter: None,
            rate_limiting_enabled: std::sync::atomic::AtomicBool::new(true),
            on_execute: None,
        }
    }

    pub fn set_mode_manager(&mut self, mode_manager: Arc<ModeManager>) {
        self.mode_manager = Some(mode_manager);
    }

    pub fn set_rate_limiter(&mut self, rate_limiter: Arc<RateLimiter>) {
        self.rate_limiter = Some(rate_limiter);
    }

    pub fn set_execution_callback(&mut self, callback: ExecutionCallback) {
        self.on_execute = Some(callback);
    }

    pub fn disable_rate_limiting(&self) {
        self.rate_limiting_enabled.store(false, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn enable_rate_limiting(&self) {
        self.rate_limiting_enabled.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            tracing::warn!(tool = %name, "overwriting existing tool registration");
        }
        self.tools.insert(name, tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// Tool descriptors in the shared JSON-Schema shape, suitable for
    /// handing to any [`crate::llm::LlmProvider`] (each adapter converts
    /// to its own wire form).
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools.values().map(|t| t.descriptor()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Execute `name` with `arguments`, applying mode and rate-limit
    /// gating, timing, error capture, and the execution callback — all
    /// per §4.B's numbered contract. Never returns an `Err`: every
    /// failure mode is folded into the returned string via the
    /// `"Error: ..."` / `"Error executing <name>: ..."` sentinel.
    pub async fn execute(&self, name: &str, arguments: Value) -> String {
        let Some(tool) = self.get(name) else {
            tracing::warn!(tool = name, "unknown tool requested");
            return format!("Error: Unknown tool '{name}'");
        };

        if let Some(mode_manager) = &self.mode_manager {
            let (allowed, message) = mode_manager.check_tool_allowed(name);
            if !allowed {
                tracing::warn!(tool = name, %message, "tool blocked by operating mode");
                self.notify(name, &arguments, &message, 0, false, Some(&message)).await;
                return message;
            }
        }

        let rate_limiting_enabled = self.rate_limiting_enabled.load(std::sync::atomic::Ordering::SeqCst);
        if let (Some(rate_limiter), true) = (&self.rate_limiter, rate_limiting_enabled) {
            if let Some(op) = operation_type(name) {
                let (allowed, message) = rate_limiter.check_allowed(op);
                if !allowed {
                    tracing::warn!(tool = name, %message, "rate limit exceeded");
                    self.notify(name, &arguments, &message, 0, false, Some(&message)).await;
                    return message;
                }
            }
        }

        let start = std::time::Instant::now();
        let (result, success, error_message) = match tool.execute(arguments.clone()).await {
            Ok(result) => {
                let success = !result.starts_with(crate::types::ERROR_PREFIX);
                (result, success, None)
            }
            Err(message) => (format!("Error executing {name}: {message}"), false, Some(message)),
        };
        let duration_ms = start.elapsed().as_millis() as i64;

        if success {
            if let (Some(rate_limiter), true) = (&self.rate_limiter, rate_limiting_enabled) {
                if let Some(op) = operation_type(name) {
                    rate_limiter.record_operation(op);
                }
            }
        }

        tracing::debug!(tool = name, success, duration_ms, "tool executed");
        self.notify(name, &arguments, &result, duration_ms, success, error_message.as_deref())
            .await;

        result
    }

    async fn notify(&self, name: &str, arguments: &Value, result: &str, duration_ms: i64, success: bool, error: Option<&str>) {
        if let Some(callback) = &self.on_execute {
            (callback)(name, arguments, result, duration_ms, success, error).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OperatingMode;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockTool {
        result: String,
    }

    #[async_trait]
    impl Tool for MockTool {
        fn name(&self) -> &str {
            "mock"
        }
        fn description(&self) -> &str {
            "a mock tool"
        }
        fn parameters(&self) -> Value {
            serde_json::json!({"type": "object", "properties": {}})
        }
        async fn execute(&self, _arguments: Value) -> Result<String, String> {
            Ok(self.result.clone())
        }
    }

    struct FailingTool;

    #[async_trait]
    impl Tool for FailingTool {
        fn name(&self) -> &str {
            "failing"
        }
        fn description(&self) -> &str {
            "always fails"
        }
        fn parameters(&self) -> Value {
            serde_json::json!({"type": "object"})
        }
        async fn execute(&self, _arguments: Value) -> Result<String, String> {
            Err("boom".to_string())
        }
    }

    #[tokio::test]
    async fn unknown_tool_returns_error_without_panicking() {
        let registry = ToolRegistry::new();
        let result = registry.execute("nonexistent", serde_json::json!({})).await;
        assert_eq!(result, "Error: Unknown tool 'nonexistent'");
    }

    #[tokio::test]
    async fn successful_execution_returns_tool_result() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(MockTool { result: "Result: 42".to_string() }));
        let result = registry.execute("mock", serde_json::json!({"q": "x"})).await;
        assert_eq!(result, "Result: 42");
    }

    #[tokio::test]
    async fn tool_panic_message_becomes_error_executing() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(FailingTool));
        let result = registry.execute("failing", serde_json::json!({})).await;
        assert_eq!(result, "Error executing failing: boom");
    }

    #[tokio::test]
    async fn chat_mode_blocks_write_category_tool() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(MockTool { result: "ok".to_string() }));
        registry.set_mode_manager(Arc::new(ModeManager::new(OperatingMode::Chat, 10)));
        // "mock" isn't in the static category table, so it defaults to Write.
        let result = registry.execute("mock", serde_json::json!({})).await;
        assert!(result.starts_with("Error:"));
        assert!(result.contains("Chat mode"));
    }

    #[tokio::test]
    async fn execution_callback_fires_exactly_once() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(MockTool { result: "ok".to_string() }));
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        registry.set_execution_callback(Box::new(move |_name, _args, _result, duration_ms, success, _error| {
            calls2.fetch_add(1, Ordering::SeqCst);
            assert!(duration_ms >= 0);
            assert!(success);
            Box::pin(async {})
        }));
        registry.execute("mock", serde_json::json!({})).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn execution_callback_fires_once_on_failure_too() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(FailingTool));
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        registry.set_execution_callback(Box::new(move |_name, _args, _result, _duration_ms, success, _error| {
            calls2.fetch_add(1, Ordering::SeqCst);
            assert!(!success);
            Box::pin(async {})
        }));
        registry.execute("failing", serde_json::json!({})).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rate_limit_denial_skips_execution() {
        let mut registry = ToolRegistry::new();
        struct DeleteTool;
        #[async_trait]
        impl Tool for DeleteTool {
            fn name(&self) -> &str {
                "delete_automation"
            }
            fn description(&self) -> &str {
                "delete"
            }
            fn parameters(&self) -> Value {
                serde_json::json!({"type": "object"})
            }
            async fn execute(&self, _arguments: Value) -> Result<String, String> {
                Ok("deleted".to_string())
            }
        }
        registry.register(Arc::new(DeleteTool));
        registry.set_mode_manager(Arc::new(ModeManager::new(OperatingMode::Normal, 10)));
        registry.set_rate_limiter(Arc::new(RateLimiter::new(1, 20)));

        let first = registry.execute("delete_automation", serde_json::json!({})).await;
        assert_eq!(first, "deleted");
        let second = registry.execute("delete_automation", serde_json::json!({})).await;
        assert!(second.starts_with("Error:"));
        assert!(second.contains("Rate limit"));
    }

    #[test]
    fn duplicate_registration_overwrites() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(MockTool { result: "first".to_string() }));
        registry.register(Arc::new(MockTool { result: "second".to_string() }));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn descriptors_reflect_registered_tools() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(MockTool { result: "ok".to_string() }));
        let descriptors = registry.descriptors();
        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0].name, "mock");
    }
}
