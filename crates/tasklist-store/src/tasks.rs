use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use tracing::instrument;

use tasklist_core::{NewTask, Task, TaskId, TaskPatch};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

const TASK_COLUMNS: &str = "id, content, completed, created_at, updated_at";

/// Task collection backed by the `tasks` table.
#[derive(Clone)]
pub struct TaskRepo {
    db: Database,
}

impl TaskRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Every stored task, in insertion order.
    #[instrument(skip(self))]
    pub fn list_all(&self) -> Result<Vec<Task>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {TASK_COLUMNS} FROM tasks ORDER BY rowid"))?;
            let mut rows = stmt.query([])?;
            let mut tasks = Vec::new();
            while let Some(row) = rows.next()? {
                tasks.push(row_to_task(row)?);
            }
            Ok(tasks)
        })
    }

    /// Create a task. Content is stored exactly as given.
    #[instrument(skip(self, new), fields(task_id))]
    pub fn create(&self, new: &NewTask) -> Result<Task, StoreError> {
        let id = TaskId::new();
        tracing::Span::current().record("task_id", id.as_str());
        let now = row_helpers::now();
        let stamp = row_helpers::format_timestamp(&now);

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO tasks (id, content, completed, created_at, updated_at)
                 VALUES (?1, ?2, 0, ?3, ?4)",
                rusqlite::params![id.as_str(), new.content, stamp, stamp],
            )?;

            Ok(Task {
                id,
                content: new.content.clone(),
                completed: false,
                created_at: now,
                updated_at: now,
            })
        })
    }

    #[instrument(skip(self), fields(task_id = %id))]
    pub fn find_by_id(&self, id: &TaskId) -> Result<Task, StoreError> {
        self.db.with_conn(|conn| select_task(conn, id))
    }

    /// Apply the supplied patch fields and refresh `updated_at`.
    ///
    /// The read and the write happen under one connection lock, so the
    /// update is atomic for this record. Concurrent updates: last write wins.
    #[instrument(skip(self, patch), fields(task_id = %id))]
    pub fn update_by_id(&self, id: &TaskId, patch: &TaskPatch) -> Result<Task, StoreError> {
        self.db.with_conn(|conn| {
            let mut task = select_task(conn, id)?;
            patch.apply_to(&mut task);
            task.updated_at = next_update_stamp(task.updated_at);

            conn.execute(
                "UPDATE tasks SET content = ?1, completed = ?2, updated_at = ?3 WHERE id = ?4",
                rusqlite::params![
                    task.content,
                    task.completed,
                    row_helpers::format_timestamp(&task.updated_at),
                    id.as_str(),
                ],
            )?;

            Ok(task)
        })
    }

    /// Hard delete. Deleting an id that is not stored is `NotFound`, including a
    /// second delete of the same id.
    #[instrument(skip(self), fields(task_id = %id))]
    pub fn delete_by_id(&self, id: &TaskId) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let affected = conn.execute("DELETE FROM tasks WHERE id = ?1", [id.as_str()])?;
            if affected == 0 {
                return Err(StoreError::NotFound(format!("task {id}")));
            }
            Ok(())
        })
    }

    /// Remove every task. Returns how many were removed.
    #[instrument(skip(self))]
    pub fn delete_all(&self) -> Result<usize, StoreError> {
        self.db
            .with_conn(|conn| Ok(conn.execute("DELETE FROM tasks", [])?))
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        self.db.with_conn(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM tasks", [], |row| row.get(0))?;
            Ok(n as usize)
        })
    }
}

fn select_task(conn: &Connection, id: &TaskId) -> Result<Task, StoreError> {
    let mut stmt = conn.prepare(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"))?;
    let mut rows = stmt.query([id.as_str()])?;
    match rows.next()? {
        Some(row) => row_to_task(row),
        None => Err(StoreError::NotFound(format!("task {id}"))),
    }
}

/// `updated_at` must move strictly forward even when the clock has not.
fn next_update_stamp(previous: DateTime<Utc>) -> DateTime<Utc> {
    let floor = previous + Duration::microseconds(1);
    row_helpers::now().max(floor)
}

fn row_to_task(row: &rusqlite::Row<'_>) -> Result<Task, StoreError> {
    let created_at: String = row_helpers::get(row, 3, "tasks", "created_at")?;
    let updated_at: String = row_helpers::get(row, 4, "tasks", "updated_at")?;

    Ok(Task {
        id: TaskId::from_raw(row_helpers::get::<String>(row, 0, "tasks", "id")?),
        content: row_helpers::get_opt(row, 1, "tasks", "content")?,
        completed: row_helpers::get(row, 2, "tasks", "completed")?,
        created_at: row_helpers::parse_timestamp(&created_at, "tasks", "created_at")?,
        updated_at: row_helpers::parse_timestamp(&updated_at, "tasks", "updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn repo() -> TaskRepo {
        TaskRepo::new(Database::in_memory().unwrap())
    }

    #[test]
    fn create_then_read() {
        let repo = repo();
        let created = repo.create(&NewTask::with_content("Go to sleep!")).unwrap();
        assert!(created.id.as_str().starts_with("task_"));
        assert!(!created.completed);
        assert_eq!(created.created_at, created.updated_at);

        let found = repo.find_by_id(&created.id).unwrap();
        assert_eq!(found, created);
        assert_eq!(found.content.as_deref(), Some("Go to sleep!"));
    }

    #[test]
    fn create_accepts_empty_and_missing_content() {
        let repo = repo();
        let empty = repo.create(&NewTask::with_content("")).unwrap();
        let missing = repo.create(&NewTask::default()).unwrap();

        assert_eq!(repo.find_by_id(&empty.id).unwrap().content.as_deref(), Some(""));
        assert_eq!(repo.find_by_id(&missing.id).unwrap().content, None);
    }

    #[test]
    fn completed_patch_leaves_content_and_advances_updated_at() {
        let repo = repo();
        let task = repo.create(&NewTask::with_content("Buy coffee")).unwrap();

        let updated = repo.update_by_id(&task.id, &TaskPatch::completed(true)).unwrap();
        assert!(updated.completed);
        assert_eq!(updated.content.as_deref(), Some("Buy coffee"));
        assert_eq!(updated.created_at, task.created_at);
        assert!(updated.updated_at > task.updated_at);

        assert_eq!(repo.find_by_id(&task.id).unwrap(), updated);
    }

    #[test]
    fn back_to_back_updates_strictly_increase() {
        let repo = repo();
        let task = repo.create(&NewTask::with_content("x")).unwrap();
        let mut last = task.updated_at;
        for _ in 0..20 {
            let updated = repo.update_by_id(&task.id, &TaskPatch::default()).unwrap();
            assert!(updated.updated_at > last);
            last = updated.updated_at;
        }
    }

    #[test]
    fn content_patch_keeps_completed() {
        let repo = repo();
        let task = repo.create(&NewTask::with_content("draft")).unwrap();
        repo.update_by_id(&task.id, &TaskPatch::completed(true)).unwrap();

        let updated = repo.update_by_id(&task.id, &TaskPatch::content("final")).unwrap();
        assert!(updated.completed);
        assert_eq!(updated.content.as_deref(), Some("final"));
    }

    #[test]
    fn delete_removes() {
        let repo = repo();
        let task = repo.create(&NewTask::with_content("temp")).unwrap();
        repo.delete_by_id(&task.id).unwrap();

        assert!(repo.find_by_id(&task.id).unwrap_err().is_not_found());
        assert!(repo.delete_by_id(&task.id).unwrap_err().is_not_found());
    }

    #[test]
    fn list_completeness() {
        let repo = repo();
        assert!(repo.list_all().unwrap().is_empty());

        let a = repo.create(&NewTask::with_content("A")).unwrap();
        let b = repo.create(&NewTask::with_content("B")).unwrap();
        let c = repo.create(&NewTask::with_content("C")).unwrap();

        let all = repo.list_all().unwrap();
        assert_eq!(all.len(), 3);
        let ids: HashSet<_> = all.iter().map(|t| t.id.clone()).collect();
        assert_eq!(ids, HashSet::from([a.id.clone(), b.id.clone(), c.id.clone()]));

        // natural order is insertion order
        let order: Vec<_> = all.into_iter().map(|t| t.id).collect();
        assert_eq!(order, vec![a.id, b.id, c.id]);
    }

    #[test]
    fn unknown_id_is_not_found() {
        let repo = repo();
        repo.create(&NewTask::with_content("unrelated")).unwrap();

        for raw in ["task_missing", "not-even-an-id", ""] {
            let id = TaskId::from_raw(raw);
            assert!(repo.find_by_id(&id).unwrap_err().is_not_found());
            assert!(repo
                .update_by_id(&id, &TaskPatch::completed(true))
                .unwrap_err()
                .is_not_found());
            assert!(repo.delete_by_id(&id).unwrap_err().is_not_found());
        }
        assert_eq!(repo.count().unwrap(), 1);
    }

    #[test]
    fn delete_all_and_count() {
        let repo = repo();
        for i in 0..4 {
            repo.create(&NewTask::with_content(format!("t{i}"))).unwrap();
        }
        assert_eq!(repo.count().unwrap(), 4);
        assert_eq!(repo.delete_all().unwrap(), 4);
        assert_eq!(repo.count().unwrap(), 0);
    }

    #[test]
    fn corrupt_timestamp_is_reported() {
        let db = Database::in_memory().unwrap();
        let repo = TaskRepo::new(db.clone());
        let task = repo.create(&NewTask::with_content("x")).unwrap();
        db.with_conn(|conn| {
            conn.execute(
                "UPDATE tasks SET updated_at = 'garbage' WHERE id = ?1",
                [task.id.as_str()],
            )?;
            Ok(())
        })
        .unwrap();

        let err = repo.find_by_id(&task.id).unwrap_err();
        assert!(matches!(err, StoreError::CorruptRow { column: "updated_at", .. }));
        assert!(repo.list_all().is_err());
    }
}
