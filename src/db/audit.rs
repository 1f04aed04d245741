//! Append-only audit log: one row per message, one row per tool execution,
//! the latter optionally linked to the former (§3, §4.H).
//!
//! Grounded on `db/repository.py`'s `AuditRepository`/`AuditLogEntry`/
//! `ToolExecutionEntry`.

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, params};
use serde_json::Value;

use crate::error::Result;
use crate::types::MessageType;

use super::Database;

#[derive(Debug, Clone, PartialEq)]
pub struct AuditEntry {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub message_type: MessageType,
    pub content: String,
    pub metadata: Option<Value>,
    pub tool_executions: Vec<ToolExecutionEntry>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolExecutionEntry {
    pub id: i64,
    pub audit_log_id: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub tool_name: String,
    pub parameters: Value,
    pub result: Option<String>,
    pub duration_ms: Option<i64>,
    pub success: bool,
    pub error_message: Option<String>,
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    // SQLite's `datetime('now')` yields `YYYY-MM-DD HH:MM:SS`, naive UTC.
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .unwrap_or_else(|_| DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now()))
}

fn audit_entry_from_row(row: &Row) -> rusqlite::Result<AuditEntry> {
    let timestamp: String = row.get("timestamp")?;
    let message_type: String = row.get("message_type")?;
    let metadata: Option<String> = row.get("metadata")?;
    Ok(AuditEntry {
        id: row.get("id")?,
        timestamp: parse_timestamp(&timestamp),
        source: row.get("source")?,
        user_id: row.get("user_id")?,
        session_id: row.get("session_id")?,
        message_type: MessageType::parse(&message_type).unwrap_or(MessageType::Error),
        content: row.get("content")?,
        metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()),
        tool_executions: Vec::new(),
    })
}

fn tool_execution_from_row(row: &Row) -> rusqlite::Result<ToolExecutionEntry> {
    let timestamp: String = row.get("timestamp")?;
    let parameters: String = row.get("parameters")?;
    let success: i64 = row.get("success")?;
    Ok(ToolExecutionEntry {
        id: row.get("id")?,
        audit_log_id: row.get("audit_log_id")?,
        timestamp: parse_timestamp(&timestamp),
        tool_name: row.get("tool_name")?,
        parameters: serde_json::from_str(&parameters).unwrap_or_else(|_| serde_json::json!({})),
        result: row.get("result")?,
        duration_ms: row.get("duration_ms")?,
        success: success != 0,
        error_message: row.get("error_message")?,
    })
}

/// Append-only audit log plus tool-execution log, both backed by the
/// shared [`Database`] connection.
pub struct AuditRepository {
    db: Database,
}

impl AuditRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn log_message(
        &self,
        source: &str,
        message_type: MessageType,
        content: &str,
        user_id: Option<&str>,
        session_id: Option<&str>,
        metadata: Option<&Value>,
    ) -> Result<i64> {
        let metadata_json = metadata.map(|m| m.to_string());
        let conn = self.db.handle();
        let guard = conn.lock().await;
        guard.execute(
            "INSERT INTO audit_logs (source, user_id, session_id, message_type, content, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![source, user_id, session_id, message_type.as_str(), content, metadata_json],
        )?;
        let id = guard.last_insert_rowid();
        tracing::debug!(id, message_type = message_type.as_str(), source, "logged audit message");
        Ok(id)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn log_tool_execution(
        &self,
        tool_name: &str,
        parameters: &Value,
        result: Option<&str>,
        duration_ms: i64,
        success: bool,
        audit_log_id: Option<i64>,
        error_message: Option<&str>,
    ) -> Result<i64> {
        let params_json = parameters.to_string();
        let conn = self.db.handle();
        let guard = conn.lock().await;
        guard.execute(
            "INSERT INTO tool_executions
             (audit_log_id, tool_name, parameters, result, duration_ms, success, error_message)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![audit_log_id, tool_name, params_json, result, duration_ms, success as i64, error_message],
        )?;
        let id = guard.last_insert_rowid();
        tracing::debug!(id, tool_name, success, "logged tool execution");
        Ok(id)
    }

    /// Tool-execution rows for `tool_name`, most recent first, regardless
    /// of whether they're linked to a parent audit entry. Used to verify
    /// §8's "exactly one tool-execution row" testable properties without
    /// needing a linking audit id.
    pub async fn recent_tool_executions(&self, tool_name: &str, limit: i64) -> Result<Vec<ToolExecutionEntry>> {
        let conn = self.db.handle();
        let guard = conn.lock().await;
        let mut stmt = guard.prepare(
            "SELECT * FROM tool_executions WHERE tool_name = ?1 ORDER BY timestamp DESC, id DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![tool_name, limit], tool_execution_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub async fn recent_logs(
        &self,
        limit: i64,
        offset: i64,
        source: Option<&str>,
        message_type: Option<MessageType>,
    ) -> Result<Vec<AuditEntry>> {
        let conn = self.db.handle();
        let guard = conn.lock().await;

        let mut sql = String::from("SELECT * FROM audit_logs");
        let mut conditions = Vec::new();
        if source.is_some() {
            conditions.push("source = ?");
        }
        if message_type.is_some() {
            conditions.push("message_type = ?");
        }
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        sql.push_str(" ORDER BY timestamp DESC, id DESC LIMIT ? OFFSET ?");

        let mut stmt = guard.prepare(&sql)?;
        let message_type_str = message_type.map(|m| m.as_str());

        let rows: Vec<AuditEntry> = match (source, message_type_str) {
            (Some(s), Some(mt)) => stmt
                .query_map(params![s, mt, limit, offset], audit_entry_from_row)?
                .collect::<rusqlite::Result<_>>()?,
            (Some(s), None) => stmt
                .query_map(params![s, limit, offset], audit_entry_from_row)?
                .collect::<rusqlite::Result<_>>()?,
            (None, Some(mt)) => stmt
                .query_map(params![mt, limit, offset], audit_entry_from_row)?
                .collect::<rusqlite::Result<_>>()?,
            (None, None) => stmt
                .query_map(params![limit, offset], audit_entry_from_row)?
                .collect::<rusqlite::Result<_>>()?,
        };
        Ok(rows)
    }

    /// Audit logs for a single user, most recent first — used by
    /// `LoadHistoryFromAudit` (§4.G), which needs `2 * limit` raw entries
    /// before filtering down to user/assistant turns.
    pub async fn recent_logs_for_user(&self, user_id: &str, limit: i64) -> Result<Vec<AuditEntry>> {
        let conn = self.db.handle();
        let guard = conn.lock().await;
        let mut stmt = guard.prepare(
            "SELECT * FROM audit_logs WHERE user_id = ?1 ORDER BY timestamp DESC, id DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![user_id, limit], audit_entry_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub async fn get_log_by_id(&self, id: i64) -> Result<Option<AuditEntry>> {
        let conn = self.db.handle();
        let guard = conn.lock().await;
        let mut entry = match guard
            .query_row("SELECT * FROM audit_logs WHERE id = ?1", params![id], audit_entry_from_row)
            .optional()?
        {
            Some(e) => e,
            None => return Ok(None),
        };

        let mut stmt = guard.prepare("SELECT * FROM tool_executions WHERE audit_log_id = ?1 ORDER BY timestamp")?;
        entry.tool_executions = stmt
            .query_map(params![id], tool_execution_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(Some(entry))
    }

    pub async fn search_logs(&self, query: &str, limit: i64, offset: i64) -> Result<Vec<AuditEntry>> {
        let pattern = format!("%{query}%");
        let conn = self.db.handle();
        let guard = conn.lock().await;
        let mut stmt = guard.prepare(
            "SELECT * FROM audit_logs WHERE content LIKE ?1 ORDER BY timestamp DESC, id DESC LIMIT ?2 OFFSET ?3",
        )?;
        let rows = stmt
            .query_map(params![pattern, limit, offset], audit_entry_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Deletes tool executions referencing entries older than `days`, then
    /// the entries themselves — in that order, to respect the foreign key.
    pub async fn cleanup_old_logs(&self, days: i64) -> Result<usize> {
        let cutoff = format!("-{days} days");
        let conn = self.db.handle();
        let guard = conn.lock().await;
        guard.execute(
            "DELETE FROM tool_executions WHERE audit_log_id IN (
                SELECT id FROM audit_logs WHERE timestamp < datetime('now', ?1)
             )",
            params![cutoff],
        )?;
        let deleted = guard.execute("DELETE FROM audit_logs WHERE timestamp < datetime('now', ?1)", params![cutoff])?;
        if deleted > 0 {
            tracing::info!(deleted, "cleaned up old audit log entries");
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn repo() -> AuditRepository {
        AuditRepository::new(Database::open_in_memory().unwrap())
    }

    #[tokio::test]
    async fn log_and_fetch_message() {
        let repo = repo().await;
        let id = repo
            .log_message("web", MessageType::User, "hi", Some("u1"), None, None)
            .await
            .unwrap();
        let entry = repo.get_log_by_id(id).await.unwrap().unwrap();
        assert_eq!(entry.content, "hi");
        assert_eq!(entry.user_id.as_deref(), Some("u1"));
        assert_eq!(entry.message_type, MessageType::User);
    }

    #[tokio::test]
    async fn log_tool_execution_links_to_audit_entry() {
        let repo = repo().await;
        let audit_id = repo.log_message("web", MessageType::User, "hi", Some("u1"), None, None).await.unwrap();
        repo.log_tool_execution(
            "mock",
            &serde_json::json!({"q": "x"}),
            Some("Result: 42"),
            5,
            true,
            Some(audit_id),
            None,
        )
        .await
        .unwrap();

        let entry = repo.get_log_by_id(audit_id).await.unwrap().unwrap();
        assert_eq!(entry.tool_executions.len(), 1);
        assert_eq!(entry.tool_executions[0].tool_name, "mock");
        assert!(entry.tool_executions[0].success);
    }

    #[tokio::test]
    async fn search_logs_matches_substring() {
        let repo = repo().await;
        repo.log_message("web", MessageType::User, "turn on the kitchen light", Some("u1"), None, None)
            .await
            .unwrap();
        repo.log_message("web", MessageType::User, "what's the weather", Some("u1"), None, None)
            .await
            .unwrap();

        let results = repo.search_logs("kitchen", 10, 0).await.unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn recent_logs_filters_by_type_and_source() {
        let repo = repo().await;
        repo.log_message("web", MessageType::User, "hi", Some("u1"), None, None).await.unwrap();
        repo.log_message("bot", MessageType::Assistant, "hello", Some("u1"), None, None).await.unwrap();

        let user_only = repo.recent_logs(10, 0, None, Some(MessageType::User)).await.unwrap();
        assert_eq!(user_only.len(), 1);

        let bot_only = repo.recent_logs(10, 0, Some("bot"), None).await.unwrap();
        assert_eq!(bot_only.len(), 1);
    }

    #[tokio::test]
    async fn recent_logs_for_user_is_scoped() {
        let repo = repo().await;
        repo.log_message("web", MessageType::User, "u1 says hi", Some("u1"), None, None).await.unwrap();
        repo.log_message("web", MessageType::User, "u2 says hi", Some("u2"), None, None).await.unwrap();

        let rows = repo.recent_logs_for_user("u1", 10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].content, "u1 says hi");
    }
}
