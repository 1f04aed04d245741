//! Tools over the long-term memory store (§4.H). Grounded on
//! `tools/memory_tools.py`. User-facing text is written fresh in English
//! rather than carried over from the original's German strings.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::db::memory::MemoryRepository;
use crate::types::MemoryCategory;

use super::Tool;

pub struct StoreMemoryTool {
    memory_repo: Arc<MemoryRepository>,
}

impl StoreMemoryTool {
    pub fn new(memory_repo: Arc<MemoryRepository>) -> Self {
        Self { memory_repo }
    }
}

#[async_trait]
impl Tool for StoreMemoryTool {
    fn name(&self) -> &str {
        "store_memory"
    }

    fn description(&self) -> &str {
        "Store a fact or preference to remember long-term. Use this when the user says \
         'remember this' or shares important information about their home, devices, \
         preferences, or routines that should persist across conversations. Be concise \
         - store the essence, not the full exchange."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "content": {
                    "type": "string",
                    "description": "The fact or preference to remember. Be concise and specific.",
                },
                "category": {
                    "type": "string",
                    "enum": ["user_preference", "device_info", "automation_note", "home_layout", "routine", "general"],
                    "description": "Category: user_preference (language, style), device_info (device names, locations), \
                        automation_note (notes about automations), home_layout (rooms, areas), \
                        routine (schedules, habits), general (other facts).",
                },
            },
            "required": ["content", "category"],
        })
    }

    async fn execute(&self, arguments: Value) -> Result<String, String> {
        let content = arguments.get("content").and_then(Value::as_str).unwrap_or("");
        if content.is_empty() {
            return Ok("Error: content is required.".to_string());
        }
        let category = arguments
            .get("category")
            .and_then(Value::as_str)
            .and_then(MemoryCategory::parse)
            .unwrap_or(MemoryCategory::General);

        let id = self.memory_repo.add(content, category).await.map_err(|e| e.to_string())?;
        Ok(format!("Stored (ID: {id}): {content}"))
    }
}

pub struct RecallMemoriesTool {
    memory_repo: Arc<MemoryRepository>,
}

impl RecallMemoriesTool {
    pub fn new(memory_repo: Arc<MemoryRepository>) -> Self {
        Self { memory_repo }
    }
}

#[async_trait]
impl Tool for RecallMemoriesTool {
    fn name(&self) -> &str {
        "recall_memories"
    }

    fn description(&self) -> &str {
        "Search stored memories for relevant information. Use this to recall previously \
         stored facts about the user's home, preferences, or devices."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Search term to find relevant memories.",
                },
                "category": {
                    "type": "string",
                    "enum": ["user_preference", "device_info", "automation_note", "home_layout", "routine", "general"],
                    "description": "Optional: filter by category.",
                },
            },
            "required": [],
        })
    }

    async fn execute(&self, arguments: Value) -> Result<String, String> {
        let query = arguments.get("query").and_then(Value::as_str).unwrap_or("");
        let category = arguments.get("category").and_then(Value::as_str).and_then(MemoryCategory::parse);

        let memories = if !query.is_empty() {
            self.memory_repo.search(query).await
        } else if let Some(category) = category {
            self.memory_repo.get_by_category(category).await
        } else {
            self.memory_repo.get_all().await
        }
        .map_err(|e| e.to_string())?;

        if memories.is_empty() {
            return Ok("No memories found.".to_string());
        }

        let results: Vec<String> = memories.iter().take(20).map(|m| format!("- [{}] {}", m.category.as_str(), m.content)).collect();
        Ok(format!("Found memories ({}):\n{}", memories.len(), results.join("\n")))
    }
}

pub struct ForgetMemoryTool {
    memory_repo: Arc<MemoryRepository>,
}

impl ForgetMemoryTool {
    pub fn new(memory_repo: Arc<MemoryRepository>) -> Self {
        Self { memory_repo }
    }
}

#[async_trait]
impl Tool for ForgetMemoryTool {
    fn name(&self) -> &str {
        "forget_memory"
    }

    fn description(&self) -> &str {
        "Delete a stored memory by its ID. Use this when the user wants to remove outdated \
         or incorrect information."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "memory_id": {
                    "type": "integer",
                    "description": "The ID of the memory to delete.",
                },
            },
            "required": ["memory_id"],
        })
    }

    async fn execute(&self, arguments: Value) -> Result<String, String> {
        let Some(memory_id) = arguments.get("memory_id").and_then(Value::as_i64) else {
            return Ok("Error: memory_id is required.".to_string());
        };

        let deleted = self.memory_repo.delete(memory_id).await.map_err(|e| e.to_string())?;
        if deleted {
            Ok(format!("Memory {memory_id} deleted."))
        } else {
            Ok(format!("Memory {memory_id} not found."))
        }
    }
}
