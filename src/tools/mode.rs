//! Operating-mode state machine (§4.C).
//!
//! Grounded on `utils/mode_manager.py`: a tri-state mode (Chat/Normal/Yolo)
//! gates tool execution by category, with YOLO carrying a timer that
//! reverts to Normal on read once expired. The static name→category table
//! mirrors `TOOL_CATEGORIES` verbatim; unknown tool names default to
//! `Write`, matching the original's fail-closed default.

use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::config::OperatingMode;
use crate::types::ToolCategory;

/// Category lookup for every tool this crate ships. Unlisted names default
/// to [`ToolCategory::Write`] in [`tool_category`].
const TOOL_CATEGORIES: &[(&str, ToolCategory)] = &[
    ("get_entities", ToolCategory::ReadOnly),
    ("get_entity_state", ToolCategory::ReadOnly),
    ("get_automations", ToolCategory::ReadOnly),
    ("get_automation_config", ToolCategory::ReadOnly),
    ("get_scripts", ToolCategory::ReadOnly),
    ("get_script_config", ToolCategory::ReadOnly),
    ("get_scenes", ToolCategory::ReadOnly),
    ("get_scene_config", ToolCategory::ReadOnly),
    ("get_helpers", ToolCategory::ReadOnly),
    ("get_services", ToolCategory::ReadOnly),
    ("get_error_log", ToolCategory::ReadOnly),
    ("get_logbook", ToolCategory::ReadOnly),
    ("recall_memories", ToolCategory::ReadOnly),
    ("call_service", ToolCategory::Write),
    ("create_automation", ToolCategory::Write),
    ("update_automation", ToolCategory::Write),
    ("create_script", ToolCategory::Write),
    ("update_script", ToolCategory::Write),
    ("create_scene", ToolCategory::Write),
    ("update_scene", ToolCategory::Write),
    ("create_helper", ToolCategory::Write),
    ("store_memory", ToolCategory::Write),
    ("rename_entity", ToolCategory::Write),
    ("assign_entity_area", ToolCategory::Write),
    ("assign_entity_labels", ToolCategory::Write),
    ("delete_automation", ToolCategory::Destructive),
    ("delete_script", ToolCategory::Destructive),
    ("delete_scene", ToolCategory::Destructive),
    ("delete_helper", ToolCategory::Destructive),
    ("forget_memory", ToolCategory::Destructive),
];

pub fn tool_category(name: &str) -> ToolCategory {
    TOOL_CATEGORIES
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, c)| *c)
        .unwrap_or(ToolCategory::Write)
}

struct State {
    mode: OperatingMode,
    yolo_activated_at: Option<DateTime<Utc>>,
}

/// Tracks the current operating mode and YOLO expiry. `&self` methods lock
/// internally, so one manager can be shared across the conversation
/// manager's per-user tasks via `Arc`.
pub struct ModeManager {
    yolo_duration_minutes: i64,
    state: Mutex<State>,
    on_mode_change: Mutex<Option<Box<dyn Fn(OperatingMode) + Send + Sync>>>,
}

impl ModeManager {
    pub fn new(default_mode: OperatingMode, yolo_duration_minutes: i64) -> Self {
        Self {
            yolo_duration_minutes,
            state: Mutex::new(State {
                mode: default_mode,
                yolo_activated_at: None,
            }),
            on_mode_change: Mutex::new(None),
        }
    }

    pub fn set_mode_change_callback(&self, callback: impl Fn(OperatingMode) + Send + Sync + 'static) {
        *self.on_mode_change.lock().unwrap() = Some(Box::new(callback));
    }

    /// Current mode, lazily reverting an expired YOLO window to Normal.
    /// Firing the mode-change callback happens here too, so a caller that
    /// only ever reads the mode still observes the expiry exactly once.
    pub fn current_mode(&self) -> OperatingMode {
        let mut state = self.state.lock().unwrap();
        if state.mode == OperatingMode::Yolo && self.is_yolo_expired(&state) {
            state.mode = OperatingMode::Normal;
            state.yolo_activated_at = None;
            drop(state);
            if let Some(cb) = self.on_mode_change.lock().unwrap().as_ref() {
                cb(OperatingMode::Normal);
            }
            return OperatingMode::Normal;
        }
        state.mode
    }

    fn is_yolo_expired(&self, state: &State) -> bool {
        match state.yolo_activated_at {
            None => true,
            Some(activated) => {
                let elapsed = Utc::now().signed_duration_since(activated);
                elapsed.num_seconds() >= self.yolo_duration_minutes * 60
            }
        }
    }

    pub fn yolo_remaining_seconds(&self) -> i64 {
        let state = self.state.lock().unwrap();
        if state.mode != OperatingMode::Yolo {
            return 0;
        }
        let Some(activated) = state.yolo_activated_at else {
            return 0;
        };
        let elapsed = Utc::now().signed_duration_since(activated).num_seconds();
        (self.yolo_duration_minutes * 60 - elapsed).max(0)
    }

    /// Switch to `mode`, returning a human-readable confirmation message.
    /// The mode-change callback is reserved for the lazy auto-revert in
    /// [`Self::current_mode`] (§8: "fires exactly one mode-change
    /// callback" counts only the expiry revert) — an explicit `set_mode`
    /// call doesn't fire it, since the caller already knows it changed
    /// the mode.
    pub fn set_mode(&self, mode: OperatingMode) -> String {
        let mut state = self.state.lock().unwrap();
        state.mode = mode;
        state.yolo_activated_at = if mode == OperatingMode::Yolo { Some(Utc::now()) } else { None };
        drop(state);

        match mode {
            OperatingMode::Yolo => format!(
                "YOLO mode activated for {} minutes. All actions will be auto-approved. Be careful!",
                self.yolo_duration_minutes
            ),
            OperatingMode::Chat => {
                "Chat mode activated. I can analyze and recommend, but I won't make any changes \
                 until you switch to Normal or YOLO mode."
                    .to_string()
            }
            OperatingMode::Normal => {
                "Normal mode activated. I'll ask for confirmation before making significant changes."
                    .to_string()
            }
        }
    }

    /// `(allowed, message)`. Read-only tools always pass; everything else is
    /// blocked in Chat mode with an explanatory message the conversation
    /// manager can hand straight to the user.
    pub fn check_tool_allowed(&self, tool_name: &str) -> (bool, String) {
        let mode = self.current_mode();
        let category = tool_category(tool_name);

        if category == ToolCategory::ReadOnly {
            return (true, String::new());
        }

        if mode == OperatingMode::Chat {
            return (
                false,
                format!(
                    "I'm in Chat mode and cannot execute '{tool_name}'. Switch to Normal mode \
                     ('enable normal mode') or YOLO mode ('enable yolo mode') if you want me to make changes."
                ),
            );
        }

        (true, String::new())
    }

    /// True for destructive tools in Normal mode; YOLO and Chat never need
    /// confirmation (Chat blocks the tool outright instead).
    pub fn needs_confirmation(&self, tool_name: &str) -> bool {
        match self.current_mode() {
            OperatingMode::Yolo | OperatingMode::Chat => false,
            OperatingMode::Normal => tool_category(tool_name) == ToolCategory::Destructive,
        }
    }

    pub fn status_description(&self) -> &'static str {
        match self.current_mode() {
            OperatingMode::Chat => "Read-only mode. Analysis and recommendations only.",
            OperatingMode::Normal => "Standard mode. Confirmation required for destructive actions.",
            OperatingMode::Yolo => "Auto-approve mode. All actions executed without confirmation.",
        }
    }

    /// Human-readable status block, used both for direct mode queries and
    /// for the system-prompt's mode-status section (§4.H).
    pub fn format_mode_response(&self) -> String {
        let mode = self.current_mode();
        let mut response = format!("I'm currently in **{}** mode.\n\n{}\n", mode_label(mode), self.status_description());
        if mode == OperatingMode::Yolo {
            let minutes = self.yolo_remaining_seconds() as f64 / 60.0;
            response.push_str(&format!("\nYOLO mode expires in {minutes:.1} minutes."));
        }
        response
    }
}

fn mode_label(mode: OperatingMode) -> &'static str {
    match mode {
        OperatingMode::Chat => "CHAT",
        OperatingMode::Normal => "NORMAL",
        OperatingMode::Yolo => "YOLO",
    }
}

/// Parses a free-text message for a mode-switch command. Evaluation order
/// is Chat, then Normal, then YOLO — preserved from the original so that a
/// message matching more than one pattern list resolves the same way.
pub fn parse_mode_command(message: &str) -> Option<OperatingMode> {
    let lower = message.to_lowercase();
    let lower = lower.trim();

    const CHAT_PATTERNS: &[&str] = &[
        "enable chat mode",
        "switch to chat mode",
        "activate chat mode",
        "chat mode",
        "read only mode",
        "read-only mode",
    ];
    const NORMAL_PATTERNS: &[&str] = &[
        "enable normal mode",
        "switch to normal mode",
        "activate normal mode",
        "normal mode",
        "disable yolo mode",
        "disable yolo",
        "exit yolo mode",
    ];
    const YOLO_PATTERNS: &[&str] = &["enable yolo mode", "switch to yolo mode", "activate yolo mode", "yolo mode", "yolo"];

    if CHAT_PATTERNS.iter().any(|p| lower.contains(p)) {
        return Some(OperatingMode::Chat);
    }
    if NORMAL_PATTERNS.iter().any(|p| lower.contains(p)) {
        return Some(OperatingMode::Normal);
    }
    if YOLO_PATTERNS.iter().any(|p| lower.contains(p)) {
        return Some(OperatingMode::Yolo);
    }
    None
}

pub fn is_mode_query(message: &str) -> bool {
    let lower = message.to_lowercase();
    const QUERY_PATTERNS: &[&str] = &["what mode", "which mode", "current mode", "what's my mode", "what is my mode", "mode status"];
    QUERY_PATTERNS.iter().any(|p| lower.contains(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_mode_blocks_write_tools() {
        let mgr = ModeManager::new(OperatingMode::Chat, 10);
        let (allowed, msg) = mgr.check_tool_allowed("call_service");
        assert!(!allowed);
        assert!(msg.contains("Chat mode"));

        let (allowed, _) = mgr.check_tool_allowed("get_entities");
        assert!(allowed);
    }

    #[test]
    fn normal_mode_allows_writes_but_confirms_destructive() {
        let mgr = ModeManager::new(OperatingMode::Normal, 10);
        let (allowed, _) = mgr.check_tool_allowed("call_service");
        assert!(allowed);
        assert!(!mgr.needs_confirmation("call_service"));
        assert!(mgr.needs_confirmation("delete_automation"));
    }

    #[test]
    fn yolo_mode_needs_no_confirmation() {
        let mgr = ModeManager::new(OperatingMode::Normal, 10);
        mgr.set_mode(OperatingMode::Yolo);
        assert!(!mgr.needs_confirmation("delete_automation"));
    }

    #[test]
    fn yolo_expires_and_reverts_to_normal() {
        let mgr = ModeManager::new(OperatingMode::Normal, 0);
        mgr.set_mode(OperatingMode::Yolo);
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert_eq!(mgr.current_mode(), OperatingMode::Normal);
    }

    #[test]
    fn mode_change_callback_fires_once_on_expiry() {
        let mgr = ModeManager::new(OperatingMode::Normal, 0);
        let calls = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let calls2 = calls.clone();
        mgr.set_mode_change_callback(move |_| {
            calls2.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });
        mgr.set_mode(OperatingMode::Yolo);
        std::thread::sleep(std::time::Duration::from_millis(10));
        mgr.current_mode();
        mgr.current_mode();
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn parse_mode_command_prefers_chat_over_normal_over_yolo() {
        assert_eq!(parse_mode_command("enable chat mode"), Some(OperatingMode::Chat));
        assert_eq!(parse_mode_command("enable normal mode"), Some(OperatingMode::Normal));
        assert_eq!(parse_mode_command("yolo"), Some(OperatingMode::Yolo));
        assert_eq!(parse_mode_command("turn on the lights"), None);
    }

    #[test]
    fn is_mode_query_detects_question() {
        assert!(is_mode_query("what mode are you in?"));
        assert!(!is_mode_query("turn on the lights"));
    }

    #[test]
    fn unknown_tool_defaults_to_write_category() {
        assert_eq!(tool_category("some_future_tool"), ToolCategory::Write);
    }
}
