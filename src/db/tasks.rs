//! Task CRUD operations.

use super::{Database, now_ms};
use crate::error::StoreError;
use crate::types::{CooldownUnit, NewTask, Task, TaskPatch};
use anyhow::Result;
use rusqlite::{Connection, Row, params};
use uuid::Uuid;

pub fn parse_task_row(row: &Row) -> rusqlite::Result<Task> {
    let id: String = row.get("id")?;
    let family: String = row.get("family")?;
    let title: String = row.get("title")?;
    let description: String = row.get("description")?;
    let created_by: String = row.get("created_by")?;
    let completed: bool = row.get("completed")?;
    let snoozed: bool = row.get("snoozed")?;
    let cooldown: u32 = row.get("cooldown")?;
    let cooldown_unit: String = row.get("cooldown_unit")?;
    let last_completed_at: Option<i64> = row.get("last_completed_at")?;
    let last_completed_by: Option<String> = row.get("last_completed_by")?;
    let triggers_task: Option<String> = row.get("triggers_task")?;
    let can_view_json: String = row.get("can_view")?;
    let created_at: i64 = row.get("created_at")?;
    let updated_at: i64 = row.get("updated_at")?;

    Ok(Task {
        id,
        family,
        title,
        description,
        created_by,
        completed,
        snoozed,
        cooldown,
        cooldown_unit: CooldownUnit::from_str(&cooldown_unit).unwrap_or(CooldownUnit::Never),
        last_completed_at,
        last_completed_by,
        triggers_task,
        can_view: serde_json::from_str(&can_view_json).unwrap_or_default(),
        created_at,
        updated_at,
    })
}

/// Internal helper to get a task using an existing connection (avoids deadlock).
fn get_task_internal(conn: &Connection, task_id: &str) -> Result<Option<Task>> {
    let mut stmt = conn.prepare("SELECT * FROM tasks WHERE id = ?1")?;

    let result = stmt.query_row(params![task_id], parse_task_row);

    match result {
        Ok(task) => Ok(Some(task)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn task_exists(conn: &Connection, task_id: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM tasks WHERE id = ?1",
        params![task_id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn write_task(conn: &Connection, task: &Task) -> Result<()> {
    let can_view_json = serde_json::to_string(&task.can_view)?;
    conn.execute(
        "UPDATE tasks SET
            family = ?2, title = ?3, description = ?4, created_by = ?5,
            completed = ?6, snoozed = ?7, cooldown = ?8, cooldown_unit = ?9,
            last_completed_at = ?10, last_completed_by = ?11,
            triggers_task = ?12, can_view = ?13, updated_at = ?14
         WHERE id = ?1",
        params![
            &task.id,
            &task.family,
            &task.title,
            &task.description,
            &task.created_by,
            task.completed,
            task.snoozed,
            task.cooldown,
            task.cooldown_unit.as_str(),
            task.last_completed_at,
            &task.last_completed_by,
            &task.triggers_task,
            can_view_json,
            task.updated_at,
        ],
    )?;
    Ok(())
}

/// Apply a patch to a task record, last-write-wins per field.
fn apply_patch(task: &mut Task, patch: TaskPatch) {
    if let Some(title) = patch.title {
        task.title = title;
    }
    if let Some(description) = patch.description {
        task.description = description;
    }
    if let Some(completed) = patch.completed {
        task.completed = completed;
    }
    if let Some(snoozed) = patch.snoozed {
        task.snoozed = snoozed;
    }
    if let Some(cooldown) = patch.cooldown {
        task.cooldown = cooldown;
    }
    if let Some(cooldown_unit) = patch.cooldown_unit {
        task.cooldown_unit = cooldown_unit;
    }
    if let Some(last_completed_at) = patch.last_completed_at {
        task.last_completed_at = Some(last_completed_at);
    }
    if let Some(last_completed_by) = patch.last_completed_by {
        task.last_completed_by = Some(last_completed_by);
    }
    if let Some(triggers_task) = patch.triggers_task {
        task.triggers_task = triggers_task;
    }
    if let Some(can_view) = patch.can_view {
        task.can_view = can_view;
    }
}

impl Database {
    /// Create a new task with a generated id.
    ///
    /// Rejects trigger links pointing at unknown tasks.
    pub fn create_task(&self, input: NewTask) -> Result<Task> {
        let task_id = Uuid::new_v4().to_string();
        let now = now_ms();
        let can_view_json = serde_json::to_string(&input.can_view)?;

        self.with_conn(|conn| {
            if let Some(ref target) = input.triggers_task {
                if !task_exists(conn, target)? {
                    return Err(StoreError::StaleReference(target.clone()).into());
                }
            }

            conn.execute(
                "INSERT INTO tasks (
                    id, family, title, description, created_by,
                    completed, snoozed, cooldown, cooldown_unit,
                    last_completed_at, last_completed_by, triggers_task,
                    can_view, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, 0, 0, ?6, ?7, NULL, NULL, ?8, ?9, ?10, ?11)",
                params![
                    &task_id,
                    &input.family,
                    &input.title,
                    &input.description,
                    &input.created_by,
                    input.cooldown,
                    input.cooldown_unit.as_str(),
                    &input.triggers_task,
                    can_view_json,
                    now,
                    now,
                ],
            )?;

            Ok(Task {
                id: task_id.clone(),
                family: input.family.clone(),
                title: input.title.clone(),
                description: input.description.clone(),
                created_by: input.created_by.clone(),
                completed: false,
                snoozed: false,
                cooldown: input.cooldown,
                cooldown_unit: input.cooldown_unit,
                last_completed_at: None,
                last_completed_by: None,
                triggers_task: input.triggers_task.clone(),
                can_view: input.can_view.clone(),
                created_at: now,
                updated_at: now,
            })
        })
    }

    /// Get a task by id.
    pub fn get_task(&self, task_id: &str) -> Result<Option<Task>> {
        self.with_conn(|conn| get_task_internal(conn, task_id))
    }

    /// List all tasks in a family, oldest first.
    pub fn list_tasks(&self, family: &str) -> Result<Vec<Task>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT * FROM tasks WHERE family = ?1 ORDER BY created_at ASC")?;

            let tasks = stmt
                .query_map(params![family], parse_task_row)?
                .filter_map(|r| r.ok())
                .collect();

            Ok(tasks)
        })
    }

    /// Apply a partial update to a task. Returns the updated record.
    ///
    /// Fails with `NotFound` for unknown ids, `Validation` for a
    /// self-referential trigger link, and `StaleReference` when the link
    /// target does not exist.
    pub fn update_task(&self, task_id: &str, patch: TaskPatch) -> Result<Task> {
        self.with_conn(|conn| {
            let Some(mut task) = get_task_internal(conn, task_id)? else {
                return Err(StoreError::NotFound(task_id.to_string()).into());
            };

            if let Some(Some(ref target)) = patch.triggers_task {
                if target == task_id {
                    return Err(StoreError::validation(format!(
                        "task {task_id} cannot trigger itself"
                    ))
                    .into());
                }
                if !task_exists(conn, target)? {
                    return Err(StoreError::StaleReference(target.clone()).into());
                }
            }

            apply_patch(&mut task, patch);
            task.updated_at = now_ms();
            write_task(conn, &task)?;

            Ok(task)
        })
    }

    /// Delete a task. History entries cascade. Returns the record as it was
    /// just before deletion.
    pub fn delete_task(&self, task_id: &str) -> Result<Task> {
        self.with_conn(|conn| {
            let Some(task) = get_task_internal(conn, task_id)? else {
                return Err(StoreError::NotFound(task_id.to_string()).into());
            };

            conn.execute("DELETE FROM tasks WHERE id = ?1", params![task_id])?;

            Ok(task)
        })
    }
}
