//! Long-term, keyword-searchable memory store (§3, §4.H).
//!
//! The original project's `MemoryRepository` is imported by both
//! `conversation/manager.py` and `tools/memory_tools.py` but its class body
//! is absent from the retrieved source tree — built here from first
//! principles against the `memories` table `db/connection.py` defines and
//! the operation list §4.H names, in the same idiom as [`super::audit::AuditRepository`].

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, params};

use crate::error::Result;
use crate::types::MemoryCategory;

use super::Database;

#[derive(Debug, Clone, PartialEq)]
pub struct Memory {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub category: MemoryCategory,
    pub content: String,
    pub source: Option<String>,
    pub user_id: Option<String>,
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .unwrap_or_else(|_| Utc::now())
}

fn memory_from_row(row: &Row) -> rusqlite::Result<Memory> {
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    let category: String = row.get("category")?;
    Ok(Memory {
        id: row.get("id")?,
        created_at: parse_timestamp(&created_at),
        updated_at: parse_timestamp(&updated_at),
        category: MemoryCategory::parse(&category).unwrap_or(MemoryCategory::General),
        content: row.get("content")?,
        source: row.get("source")?,
        user_id: row.get("user_id")?,
    })
}

/// Repository over the `memories` table. Every write also stamps
/// `updated_at`, even though nothing currently supports in-place edits
/// (only add/delete) — kept for the column's own sake, matching the
/// schema's intent.
pub struct MemoryRepository {
    db: Database,
}

impl MemoryRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn add(&self, content: &str, category: MemoryCategory) -> Result<i64> {
        self.add_with_context(content, category, None, None).await
    }

    pub async fn add_with_context(
        &self,
        content: &str,
        category: MemoryCategory,
        source: Option<&str>,
        user_id: Option<&str>,
    ) -> Result<i64> {
        let conn = self.db.handle();
        let guard = conn.lock().await;
        guard.execute(
            "INSERT INTO memories (category, content, source, user_id) VALUES (?1, ?2, ?3, ?4)",
            params![category.as_str(), content, source, user_id],
        )?;
        let id = guard.last_insert_rowid();
        tracing::debug!(id, category = category.as_str(), "stored memory");
        Ok(id)
    }

    pub async fn get_all(&self) -> Result<Vec<Memory>> {
        let conn = self.db.handle();
        let guard = conn.lock().await;
        let mut stmt = guard.prepare("SELECT * FROM memories ORDER BY created_at DESC")?;
        let rows = stmt.query_map([], memory_from_row)?.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub async fn get_by_category(&self, category: MemoryCategory) -> Result<Vec<Memory>> {
        let conn = self.db.handle();
        let guard = conn.lock().await;
        let mut stmt = guard.prepare("SELECT * FROM memories WHERE category = ?1 ORDER BY created_at DESC")?;
        let rows = stmt
            .query_map(params![category.as_str()], memory_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub async fn search(&self, query: &str) -> Result<Vec<Memory>> {
        let pattern = format!("%{query}%");
        let conn = self.db.handle();
        let guard = conn.lock().await;
        let mut stmt = guard.prepare("SELECT * FROM memories WHERE content LIKE ?1 ORDER BY created_at DESC")?;
        let rows = stmt.query_map(params![pattern], memory_from_row)?.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Returns whether a row was actually deleted (the original's
    /// `delete_memory` distinguishes "deleted" from "not found").
    pub async fn delete(&self, id: i64) -> Result<bool> {
        let conn = self.db.handle();
        let guard = conn.lock().await;
        let deleted = guard.execute("DELETE FROM memories WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }

    pub async fn get(&self, id: i64) -> Result<Option<Memory>> {
        let conn = self.db.handle();
        let guard = conn.lock().await;
        let row = guard
            .query_row("SELECT * FROM memories WHERE id = ?1", params![id], memory_from_row)
            .optional()?;
        Ok(row)
    }

    /// Formats all stored memories into the block injected into the
    /// system prompt by the conversation manager (§4.G), grouped by
    /// category. Returns an empty string when there are no memories, so
    /// callers can skip appending anything.
    pub async fn get_memory_summary(&self) -> Result<String> {
        let memories = self.get_all().await?;
        if memories.is_empty() {
            return Ok(String::new());
        }

        let mut by_category: Vec<(MemoryCategory, Vec<&Memory>)> = Vec::new();
        for mem in &memories {
            if let Some(entry) = by_category.iter_mut().find(|(c, _)| *c == mem.category) {
                entry.1.push(mem);
            } else {
                by_category.push((mem.category, vec![mem]));
            }
        }

        let mut summary = String::from("## Remembered Facts\n");
        for (category, mems) in by_category {
            summary.push_str(&format!("\n**{}**:\n", category.as_str()));
            for mem in mems {
                summary.push_str(&format!("- {}\n", mem.content));
            }
        }
        Ok(summary)
    }
}
