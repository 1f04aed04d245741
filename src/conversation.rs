//! Multi-user conversation manager and planning loop (§4.G).
//!
//! Grounded on `conversation/manager.py`'s `ConversationManager`: one
//! per-user message history, a persona/mode/memory system prompt built
//! fresh each turn, and a bounded loop that interleaves LLM calls with
//! [`crate::tools::ToolRegistry`] executions until the model stops asking
//! for tools. Dependencies (LLM provider, registry, mode manager, audit
//! repository, memory repository) are injected at construction per §9's
//! "inject dependencies, no back-references" note — this module never
//! reaches back into the registry or the bridge that feeds it.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::db::audit::AuditRepository;
use crate::db::memory::MemoryRepository;
use crate::error::Result;
use crate::llm::LlmProvider;
use crate::tools::{ModeManager, ToolRegistry, mode};
use crate::types::{Message, MessageType, Role, ToolCall, UserContext};

/// Fallback persona. Fresh prose written for this crate (per `DESIGN.md`),
/// structured the way the original's system prompt is structured: identity
/// and tone, capability/non-capability list, a safety-override sentence,
/// then the mode-status and user-identity paragraphs appended per turn.
const PERSONA: &str = "You are Mimir, a calm and capable assistant for a smart home. \
You read and adjust the home's automations, scripts, scenes, and devices through the \
tools available to you, and you explain what you changed and why in plain language. \
You do not invent device names, entity ids, or automation behavior you have not \
observed through a tool call — when you are unsure, check first. \
You never bypass the operating mode or rate limits described below; if a tool \
refuses an action, tell the operator why instead of trying to work around it.";

/// Returned when the planning loop exhausts [`ConversationManager::max_tool_iterations`]
/// without the model producing a final text reply.
const ITERATION_LIMIT_REPLY: &str =
    "I worked through a number of tool calls on that but hit my iteration limit before finishing. \
     Let me know if you'd like me to keep going.";

/// Returned when the model's final turn carries neither text nor tool calls.
const EMPTY_REPLY_FALLBACK: &str = "I didn't have anything useful to add there.";

struct UserState {
    history: Vec<Message>,
}

impl UserState {
    fn new() -> Self {
        Self { history: Vec::new() }
    }
}

/// Owns per-user history and drives the planning loop (§4.G). Different
/// users are processed in parallel; a single user's messages serialize in
/// arrival order via a per-user lock (§5).
pub struct ConversationManager {
    llm: Arc<dyn LlmProvider>,
    registry: Arc<ToolRegistry>,
    mode_manager: Arc<ModeManager>,
    audit: Arc<AuditRepository>,
    memory: Arc<MemoryRepository>,
    users: Mutex<HashMap<String, Arc<Mutex<UserState>>>>,
    max_history: usize,
    max_tool_iterations: usize,
}

impl ConversationManager {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        registry: Arc<ToolRegistry>,
        mode_manager: Arc<ModeManager>,
        audit: Arc<AuditRepository>,
        memory: Arc<MemoryRepository>,
        max_history: usize,
        max_tool_iterations: usize,
    ) -> Self {
        Self {
            llm,
            registry,
            mode_manager,
            audit,
            memory,
            users: Mutex::new(HashMap::new()),
            max_history,
            max_tool_iterations,
        }
    }

    async fn user_state(&self, user_id: &str) -> Arc<Mutex<UserState>> {
        let mut users = self.users.lock().await;
        users
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(UserState::new())))
            .clone()
    }

    /// `ProcessMessage` (§4.G): turns one inbound user message into one
    /// final reply, either by handling a mode command/query directly or by
    /// running the bounded tool-calling planning loop.
    pub async fn process_message(&self, text: &str, ctx: &UserContext) -> Result<String> {
        let state = self.user_state(&ctx.user_id).await;
        let mut state = state.lock().await;

        if let Some(reply) = self.handle_mode_message(text, ctx).await? {
            return Ok(reply);
        }

        state.history.push(Message::user(text));

        self.audit
            .log_message(&ctx.source.to_string(), MessageType::User, text, Some(&ctx.user_id), None, None)
            .await?;

        let memory_summary = self.memory.get_memory_summary().await.unwrap_or_default();
        let system_prompt = self.build_system_prompt(ctx, &memory_summary);

        let reply = self.run_planning_loop(&mut state.history, &system_prompt).await?;
        self.trim_history(&mut state.history);

        self.audit
            .log_message(&ctx.source.to_string(), MessageType::Assistant, &reply, Some(&ctx.user_id), None, None)
            .await?;

        Ok(reply)
    }

    /// Step 2 of `ProcessMessage`: if `text` matches a mode command or
    /// query, dispatch it through the mode manager and log both sides to
    /// audit, without ever entering history or the planning loop.
    async fn handle_mode_message(&self, text: &str, ctx: &UserContext) -> Result<Option<String>> {
        let reply = if let Some(mode) = mode::parse_mode_command(text) {
            Some(self.mode_manager.set_mode(mode))
        } else if mode::is_mode_query(text) {
            Some(self.mode_manager.format_mode_response())
        } else {
            None
        };

        let Some(reply) = reply else {
            return Ok(None);
        };

        self.audit
            .log_message(&ctx.source.to_string(), MessageType::User, text, Some(&ctx.user_id), None, None)
            .await?;
        self.audit
            .log_message(&ctx.source.to_string(), MessageType::Assistant, &reply, Some(&ctx.user_id), None, None)
            .await?;

        Ok(Some(reply))
    }

    fn trim_history(&self, history: &mut Vec<Message>) {
        if history.len() > self.max_history {
            let excess = history.len() - self.max_history;
            history.drain(0..excess);
        }
    }

    /// Static persona, a mode-status paragraph (including YOLO remaining
    /// minutes when active), an optional user-identity paragraph, and the
    /// memory summary — in that order, per §4.G step 6.
    fn build_system_prompt(&self, ctx: &UserContext, memory_summary: &str) -> String {
        let mut prompt = String::from(PERSONA);
        prompt.push_str("\n\n");
        prompt.push_str(&self.mode_status_paragraph());

        if let Some(identity) = self.user_identity_paragraph(ctx) {
            prompt.push_str("\n\n");
            prompt.push_str(&identity);
        }

        if !memory_summary.is_empty() {
            prompt.push_str("\n\n");
            prompt.push_str(memory_summary);
        }

        prompt
    }

    fn mode_status_paragraph(&self) -> String {
        format!("## Current Mode\n\n{}", self.mode_manager.format_mode_response())
    }

    fn user_identity_paragraph(&self, ctx: &UserContext) -> Option<String> {
        let name = ctx.friendly_name();
        if name.is_empty() {
            return None;
        }
        Some(format!("## Current Operator\n\nYou are speaking with {name} (source: {}).", ctx.source))
    }

    /// §4.G step 7: bounded sequence of LLM calls interleaved with tool
    /// executions. Always terminates within `max_tool_iterations` calls.
    async fn run_planning_loop(&self, history: &mut Vec<Message>, system_prompt: &str) -> Result<String> {
        let descriptors = self.registry.descriptors();

        for _ in 0..self.max_tool_iterations {
            let response = self.llm.complete(system_prompt, history, &descriptors).await?;

            if response.has_tool_calls() {
                history.push(Message::assistant(
                    response.content.clone().unwrap_or_default(),
                    response.tool_calls.clone(),
                ));

                for call in &response.tool_calls {
                    let result = self.execute_and_audit(call).await;
                    history.push(Message::tool_result(&call.id, result));
                }
                continue;
            }

            if let Some(content) = response.content.filter(|c| !c.is_empty()) {
                history.push(Message::assistant(content.clone(), Vec::new()));
                return Ok(content);
            }

            let fallback = EMPTY_REPLY_FALLBACK.to_string();
            history.push(Message::assistant(fallback.clone(), Vec::new()));
            return Ok(fallback);
        }

        history.push(Message::assistant(ITERATION_LIMIT_REPLY.to_string(), Vec::new()));
        Ok(ITERATION_LIMIT_REPLY.to_string())
    }

    async fn execute_and_audit(&self, call: &ToolCall) -> String {
        let result = self.registry.execute(&call.name, call.arguments.clone()).await;
        let success = !result.starts_with(crate::types::ERROR_PREFIX);
        if let Err(e) = self
            .audit
            .log_tool_execution(&call.name, &call.arguments, Some(&result), 0, success, None, None)
            .await
        {
            tracing::warn!(tool = %call.name, error = %e, "failed to persist tool execution audit entry");
        }
        result
    }

    /// Returns the in-memory history for `user_id`, filtering out
    /// tool-result turns and tool-use-only assistant turns (§4.G: "History
    /// retrieval filters out tool-result messages... and assistant
    /// messages that are purely tool-use carriers").
    pub async fn get_history(&self, user_id: &str) -> Vec<Message> {
        let state = self.user_state(user_id).await;
        let state = state.lock().await;
        state
            .history
            .iter()
            .filter(|m| m.role != Role::Tool && !m.is_tool_use_only())
            .cloned()
            .collect()
    }

    /// `LoadHistoryFromAudit` (§4.G): rebuilds a user's in-memory history
    /// from the audit log's most recent `2 * limit` entries, keeping only
    /// user/assistant types, restoring chronological order, and truncating
    /// to `limit`.
    pub async fn load_history_from_audit(&self, user_id: &str, limit: usize) -> Result<()> {
        let raw = self.audit.recent_logs_for_user(user_id, (2 * limit) as i64).await?;

        let mut restored: Vec<Message> = raw
            .into_iter()
            .filter(|e| matches!(e.message_type, MessageType::User | MessageType::Assistant))
            .map(|e| match e.message_type {
                MessageType::User => Message::user(e.content),
                _ => Message::assistant(e.content, Vec::new()),
            })
            .collect();
        restored.reverse();
        if restored.len() > limit {
            let excess = restored.len() - limit;
            restored.drain(0..excess);
        }

        let state = self.user_state(user_id).await;
        let mut state = state.lock().await;
        state.history = restored;
        Ok(())
    }
}
