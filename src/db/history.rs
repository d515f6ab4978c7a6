//! Task history audit records.

use super::{Database, now_ms};
use crate::error::StoreError;
use crate::types::HistoryEntry;
use anyhow::Result;
use rusqlite::params;
use uuid::Uuid;

impl Database {
    /// Append an immutable history entry for a task.
    ///
    /// Fails with `StaleReference` when the task no longer exists.
    pub fn create_history_entry(
        &self,
        task_id: &str,
        user_id: &str,
        completed: bool,
    ) -> Result<HistoryEntry> {
        let id = Uuid::new_v4().to_string();
        let now = now_ms();

        self.with_conn(|conn| {
            let exists: i64 = conn.query_row(
                "SELECT COUNT(*) FROM tasks WHERE id = ?1",
                params![task_id],
                |row| row.get(0),
            )?;
            if exists == 0 {
                return Err(StoreError::StaleReference(task_id.to_string()).into());
            }

            conn.execute(
                "INSERT INTO task_history (id, task_id, user_id, completed, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![&id, task_id, user_id, completed, now],
            )?;

            Ok(HistoryEntry {
                id: id.clone(),
                task_id: task_id.to_string(),
                user_id: user_id.to_string(),
                completed,
                created_at: now,
            })
        })
    }

    /// List history entries for a family, most recent first.
    pub fn list_history(&self, family: &str, limit: usize) -> Result<Vec<HistoryEntry>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT h.id, h.task_id, h.user_id, h.completed, h.created_at
                 FROM task_history h
                 JOIN tasks t ON t.id = h.task_id
                 WHERE t.family = ?1
                 ORDER BY h.created_at DESC
                 LIMIT ?2",
            )?;

            let entries = stmt
                .query_map(params![family, limit as i64], |row| {
                    Ok(HistoryEntry {
                        id: row.get(0)?,
                        task_id: row.get(1)?,
                        user_id: row.get(2)?,
                        completed: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                })?
                .filter_map(|r| r.ok())
                .collect();

            Ok(entries)
        })
    }

    /// History entries for a single task, most recent first.
    pub fn list_task_history(&self, task_id: &str, limit: usize) -> Result<Vec<HistoryEntry>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, task_id, user_id, completed, created_at
                 FROM task_history
                 WHERE task_id = ?1
                 ORDER BY created_at DESC
                 LIMIT ?2",
            )?;

            let entries = stmt
                .query_map(params![task_id, limit as i64], |row| {
                    Ok(HistoryEntry {
                        id: row.get(0)?,
                        task_id: row.get(1)?,
                        user_id: row.get(2)?,
                        completed: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                })?
                .filter_map(|r| r.ok())
                .collect();

            Ok(entries)
        })
    }
}
