use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::StoreResult;
use crate::models::{
    parse_due_date, Subtask, SubtaskId, Task, TaskDraft, TaskId, TaskPatch, UserId,
    DUE_DATE_FORMAT,
};
use crate::repository::TaskRepository;

const TASK_COLUMNS: &str = "id, user_id, text, completed, priority, due_date";
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Multi-user task storage in a SQLite file.
///
/// A connection is opened per operation. Subtasks live in their own table
/// and are removed with their parent through `ON DELETE CASCADE`.
pub struct SqliteRepository {
    path: PathBuf,
}

impl SqliteRepository {
    pub fn open<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let repo = Self {
            path: path.as_ref().to_path_buf(),
        };
        let conn = repo
            .connect()
            .with_context(|| format!("opening database at {}", path.as_ref().display()))?;
        migrate(&conn).context("migrating task schema")?;
        Ok(repo)
    }

    fn connect(&self) -> StoreResult<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "foreign_keys", true)?;
        Ok(conn)
    }
}

fn migrate(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS tasks (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            user_id TEXT NOT NULL,
            text TEXT NOT NULL,
            completed INTEGER NOT NULL DEFAULT 0,
            priority TEXT NOT NULL DEFAULT 'medium',
            due_date TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_tasks_user ON tasks (user_id);
        CREATE TABLE IF NOT EXISTS subtasks (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL,
            task_id TEXT NOT NULL REFERENCES tasks (id) ON DELETE CASCADE,
            text TEXT NOT NULL,
            completed INTEGER NOT NULL DEFAULT 0,
            UNIQUE (task_id, id)
        );
        "#,
    )
}

impl TaskRepository for SqliteRepository {
    fn list(&self, user: &UserId) -> StoreResult<Vec<Task>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE user_id = ?1 ORDER BY seq"
        ))?;
        let rows = stmt.query_map(params![user.as_str()], task_from_row)?;

        let mut tasks = Vec::new();
        for task in rows {
            tasks.push(task?);
        }

        let mut subtasks = subtasks_for_user(&conn, user)?;
        for task in &mut tasks {
            if let Some(children) = subtasks.remove(task.id.as_str()) {
                task.subtasks = children;
            }
        }
        Ok(tasks)
    }

    fn insert(&self, user: &UserId, draft: TaskDraft) -> StoreResult<Task> {
        let conn = self.connect()?;
        let id = TaskId::generate();
        conn.execute(
            "INSERT INTO tasks (id, user_id, text, completed, priority, due_date)
             VALUES (?1, ?2, ?3, 0, ?4, ?5)",
            params![
                id.as_str(),
                user.as_str(),
                draft.text,
                draft.priority.as_str(),
                draft.due_date.map(|date| date.format(DUE_DATE_FORMAT).to_string()),
            ],
        )?;
        Ok(Task {
            id,
            user_id: Some(user.clone()),
            text: draft.text,
            completed: false,
            priority: draft.priority,
            due_date: draft.due_date,
            subtasks: Vec::new(),
        })
    }

    fn find_one(&self, user: &UserId, task_id: &TaskId) -> StoreResult<Option<Task>> {
        let conn = self.connect()?;
        let task = conn
            .query_row(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1 AND user_id = ?2"),
                params![task_id.as_str(), user.as_str()],
                task_from_row,
            )
            .optional()?;

        let Some(mut task) = task else {
            return Ok(None);
        };
        task.subtasks = subtasks_for_task(&conn, task_id)?;
        Ok(Some(task))
    }

    fn update(&self, user: &UserId, task_id: &TaskId, patch: &TaskPatch) -> StoreResult<bool> {
        let conn = self.connect()?;
        let updated = conn.execute(
            "UPDATE tasks SET
                text = COALESCE(?1, text),
                completed = COALESCE(?2, completed),
                priority = COALESCE(?3, priority),
                due_date = CASE WHEN ?4 THEN ?5 ELSE due_date END
             WHERE id = ?6 AND user_id = ?7",
            params![
                patch.text,
                patch.completed,
                patch.priority.map(|priority| priority.as_str()),
                patch.due_date.is_some(),
                patch
                    .due_date
                    .flatten()
                    .map(|date| date.format(DUE_DATE_FORMAT).to_string()),
                task_id.as_str(),
                user.as_str(),
            ],
        )?;
        Ok(updated > 0)
    }

    fn toggle(&self, user: &UserId, task_id: &TaskId) -> StoreResult<Option<Task>> {
        let conn = self.connect()?;
        let task = conn
            .query_row(
                &format!(
                    "UPDATE tasks SET completed = NOT completed
                     WHERE id = ?1 AND user_id = ?2
                     RETURNING {TASK_COLUMNS}"
                ),
                params![task_id.as_str(), user.as_str()],
                task_from_row,
            )
            .optional()?;

        let Some(mut task) = task else {
            return Ok(None);
        };
        task.subtasks = subtasks_for_task(&conn, task_id)?;
        Ok(Some(task))
    }

    fn delete(&self, user: &UserId, task_id: &TaskId) -> StoreResult<bool> {
        let conn = self.connect()?;
        let deleted = conn.execute(
            "DELETE FROM tasks WHERE id = ?1 AND user_id = ?2",
            params![task_id.as_str(), user.as_str()],
        )?;
        Ok(deleted > 0)
    }

    fn push_subtask(
        &self,
        user: &UserId,
        task_id: &TaskId,
        text: &str,
    ) -> StoreResult<Option<Subtask>> {
        let conn = self.connect()?;
        let id = SubtaskId::generate();
        // Insert-select keeps the ownership check and the write in one statement.
        let inserted = conn.execute(
            "INSERT INTO subtasks (id, task_id, text, completed)
             SELECT ?1, id, ?2, 0 FROM tasks WHERE id = ?3 AND user_id = ?4",
            params![id.as_str(), text, task_id.as_str(), user.as_str()],
        )?;
        if inserted == 0 {
            return Ok(None);
        }
        Ok(Some(Subtask {
            id,
            text: text.to_string(),
            completed: false,
        }))
    }

    fn update_subtask(
        &self,
        user: &UserId,
        task_id: &TaskId,
        subtask_id: &SubtaskId,
        completed: bool,
    ) -> StoreResult<bool> {
        let conn = self.connect()?;
        let updated = conn.execute(
            "UPDATE subtasks SET completed = ?1
             WHERE id = ?2
               AND task_id IN (SELECT id FROM tasks WHERE id = ?3 AND user_id = ?4)",
            params![completed, subtask_id.as_str(), task_id.as_str(), user.as_str()],
        )?;
        Ok(updated > 0)
    }

    fn toggle_subtask(
        &self,
        user: &UserId,
        task_id: &TaskId,
        subtask_id: &SubtaskId,
    ) -> StoreResult<Option<Subtask>> {
        let conn = self.connect()?;
        let subtask = conn
            .query_row(
                "UPDATE subtasks SET completed = NOT completed
                 WHERE id = ?1
                   AND task_id IN (SELECT id FROM tasks WHERE id = ?2 AND user_id = ?3)
                 RETURNING id, text, completed",
                params![subtask_id.as_str(), task_id.as_str(), user.as_str()],
                subtask_from_row,
            )
            .optional()?;
        Ok(subtask)
    }

    fn remove_subtask(
        &self,
        user: &UserId,
        task_id: &TaskId,
        subtask_id: &SubtaskId,
    ) -> StoreResult<bool> {
        let conn = self.connect()?;
        let deleted = conn.execute(
            "DELETE FROM subtasks
             WHERE id = ?1
               AND task_id IN (SELECT id FROM tasks WHERE id = ?2 AND user_id = ?3)",
            params![subtask_id.as_str(), task_id.as_str(), user.as_str()],
        )?;
        Ok(deleted > 0)
    }
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    let user_id: String = row.get(1)?;
    let priority: String = row.get(4)?;
    let due_date: Option<String> = row.get(5)?;
    let due_date = match due_date {
        Some(value) => parse_due_date(&value).map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(err))
        })?,
        None => None,
    };

    Ok(Task {
        id: TaskId(row.get(0)?),
        user_id: Some(UserId(user_id)),
        text: row.get(2)?,
        completed: row.get(3)?,
        priority: priority.parse().unwrap_or_default(),
        due_date,
        subtasks: Vec::new(),
    })
}

fn subtask_from_row(row: &Row<'_>) -> rusqlite::Result<Subtask> {
    Ok(Subtask {
        id: SubtaskId(row.get(0)?),
        text: row.get(1)?,
        completed: row.get(2)?,
    })
}

fn subtasks_for_task(conn: &Connection, task_id: &TaskId) -> StoreResult<Vec<Subtask>> {
    let mut stmt = conn
        .prepare("SELECT id, text, completed FROM subtasks WHERE task_id = ?1 ORDER BY seq")?;
    let rows = stmt.query_map(params![task_id.as_str()], subtask_from_row)?;

    let mut subtasks = Vec::new();
    for subtask in rows {
        subtasks.push(subtask?);
    }
    Ok(subtasks)
}

fn subtasks_for_user(
    conn: &Connection,
    user: &UserId,
) -> StoreResult<HashMap<String, Vec<Subtask>>> {
    let mut stmt = conn.prepare(
        "SELECT s.task_id, s.id, s.text, s.completed
         FROM subtasks s JOIN tasks t ON t.id = s.task_id
         WHERE t.user_id = ?1
         ORDER BY s.seq",
    )?;
    let rows = stmt.query_map(params![user.as_str()], |row| {
        let task_id: String = row.get(0)?;
        let subtask = Subtask {
            id: SubtaskId(row.get(1)?),
            text: row.get(2)?,
            completed: row.get(3)?,
        };
        Ok((task_id, subtask))
    })?;

    let mut grouped: HashMap<String, Vec<Subtask>> = HashMap::new();
    for row in rows {
        let (task_id, subtask) = row?;
        grouped.entry(task_id).or_default().push(subtask);
    }
    Ok(grouped)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use tempfile::TempDir;

    use super::*;
    use crate::error::StoreError;
    use crate::models::Priority;

    fn repo() -> (TempDir, SqliteRepository) {
        let dir = tempfile::tempdir().unwrap();
        let repo = SqliteRepository::open(dir.path().join("todo.db")).unwrap();
        (dir, repo)
    }

    fn draft(text: &str) -> TaskDraft {
        TaskDraft {
            text: text.to_string(),
            priority: Priority::Medium,
            due_date: None,
        }
    }

    #[test]
    fn open_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("todo.db");
        let first = SqliteRepository::open(&path).unwrap();
        let alice = UserId::new("alice");
        first.insert(&alice, draft("survives reopen")).unwrap();

        let second = SqliteRepository::open(&path).unwrap();
        let tasks = second.list(&alice).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].text, "survives reopen");
    }

    #[test]
    fn list_is_in_insertion_order_and_scoped_to_user() {
        let (_dir, repo) = repo();
        let alice = UserId::new("alice");
        let bob = UserId::new("bob");

        repo.insert(&alice, draft("first")).unwrap();
        repo.insert(&bob, draft("bob's")).unwrap();
        repo.insert(&alice, draft("second")).unwrap();

        let texts: Vec<_> = repo
            .list(&alice)
            .unwrap()
            .into_iter()
            .map(|task| task.text)
            .collect();
        assert_eq!(texts, ["first", "second"]);
        assert_eq!(repo.list(&bob).unwrap().len(), 1);
    }

    #[test]
    fn find_one_includes_subtasks_in_order() {
        let (_dir, repo) = repo();
        let alice = UserId::new("alice");
        let task = repo.insert(&alice, draft("pack")).unwrap();

        repo.push_subtask(&alice, &task.id, "socks").unwrap().unwrap();
        repo.push_subtask(&alice, &task.id, "charger").unwrap().unwrap();

        let found = repo.find_one(&alice, &task.id).unwrap().unwrap();
        let texts: Vec<_> = found.subtasks.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, ["socks", "charger"]);
        assert_eq!(found.user_id, Some(alice));
    }

    #[test]
    fn other_users_cannot_touch_a_task() {
        let (_dir, repo) = repo();
        let alice = UserId::new("alice");
        let mallory = UserId::new("mallory");
        let task = repo.insert(&alice, draft("private")).unwrap();
        let subtask = repo.push_subtask(&alice, &task.id, "step").unwrap().unwrap();

        assert!(repo.find_one(&mallory, &task.id).unwrap().is_none());
        let patch = TaskPatch {
            completed: Some(true),
            ..TaskPatch::default()
        };
        assert!(!repo.update(&mallory, &task.id, &patch).unwrap());
        assert!(repo.push_subtask(&mallory, &task.id, "nope").unwrap().is_none());
        assert!(!repo
            .update_subtask(&mallory, &task.id, &subtask.id, true)
            .unwrap());
        assert!(!repo.remove_subtask(&mallory, &task.id, &subtask.id).unwrap());
        assert!(!repo.delete(&mallory, &task.id).unwrap());

        let task = repo.find_one(&alice, &task.id).unwrap().unwrap();
        assert!(!task.completed);
        assert_eq!(task.subtasks.len(), 1);
    }

    #[test]
    fn update_only_touches_patched_fields() {
        let (_dir, repo) = repo();
        let alice = UserId::new("alice");
        let task = repo
            .insert(
                &alice,
                TaskDraft {
                    text: "taxes".into(),
                    priority: Priority::High,
                    due_date: NaiveDate::from_ymd_opt(2025, 4, 15),
                },
            )
            .unwrap();

        let patch = TaskPatch {
            completed: Some(true),
            ..TaskPatch::default()
        };
        assert!(repo.update(&alice, &task.id, &patch).unwrap());
        let stored = repo.find_one(&alice, &task.id).unwrap().unwrap();
        assert!(stored.completed);
        assert_eq!(stored.priority, Priority::High);
        assert_eq!(stored.due_date, NaiveDate::from_ymd_opt(2025, 4, 15));

        let clear = TaskPatch {
            due_date: Some(None),
            ..TaskPatch::default()
        };
        assert!(repo.update(&alice, &task.id, &clear).unwrap());
        let stored = repo.find_one(&alice, &task.id).unwrap().unwrap();
        assert_eq!(stored.due_date, None);
        assert!(stored.completed);
    }

    #[test]
    fn toggle_flips_in_place_and_respects_ownership() {
        let (_dir, repo) = repo();
        let alice = UserId::new("alice");
        let task = repo.insert(&alice, draft("flip")).unwrap();
        let subtask = repo.push_subtask(&alice, &task.id, "child").unwrap().unwrap();

        let toggled = repo.toggle(&alice, &task.id).unwrap().unwrap();
        assert!(toggled.completed);
        assert_eq!(toggled.subtasks, vec![subtask.clone()]);
        let toggled = repo
            .toggle_subtask(&alice, &task.id, &subtask.id)
            .unwrap()
            .unwrap();
        assert!(toggled.completed);

        let mallory = UserId::new("mallory");
        assert!(repo.toggle(&mallory, &task.id).unwrap().is_none());
        assert!(repo
            .toggle_subtask(&mallory, &task.id, &subtask.id)
            .unwrap()
            .is_none());
        let stored = repo.find_one(&alice, &task.id).unwrap().unwrap();
        assert!(stored.completed);
        assert!(stored.subtasks[0].completed);
    }

    #[test]
    fn concurrent_toggles_never_lose_a_flip() {
        let (_dir, repo) = repo();
        let alice = UserId::new("alice");

        for _ in 0..50 {
            let task = repo.insert(&alice, draft("contended")).unwrap();
            let subtask = repo.push_subtask(&alice, &task.id, "child").unwrap().unwrap();

            std::thread::scope(|scope| {
                for _ in 0..2 {
                    scope.spawn(|| {
                        repo.toggle(&alice, &task.id).unwrap().unwrap();
                        repo.toggle_subtask(&alice, &task.id, &subtask.id)
                            .unwrap()
                            .unwrap();
                    });
                }
            });

            let stored = repo.find_one(&alice, &task.id).unwrap().unwrap();
            assert!(!stored.completed, "a task toggle was lost");
            assert!(!stored.subtasks[0].completed, "a subtask toggle was lost");
        }
    }

    #[test]
    fn delete_cascades_to_subtasks() {
        let (dir, repo) = repo();
        let alice = UserId::new("alice");
        let task = repo.insert(&alice, draft("parent")).unwrap();
        let subtask = repo.push_subtask(&alice, &task.id, "child").unwrap().unwrap();

        assert!(repo.delete(&alice, &task.id).unwrap());
        assert!(!repo
            .update_subtask(&alice, &task.id, &subtask.id, true)
            .unwrap());

        let conn = Connection::open(dir.path().join("todo.db")).unwrap();
        let remaining: i64 = conn
            .query_row("SELECT COUNT(*) FROM subtasks", [], |row| row.get(0))
            .unwrap();
        assert_eq!(remaining, 0);
    }

    #[test]
    fn removing_an_absent_subtask_reports_false() {
        let (_dir, repo) = repo();
        let alice = UserId::new("alice");
        let task = repo.insert(&alice, draft("parent")).unwrap();
        let subtask = repo.push_subtask(&alice, &task.id, "child").unwrap().unwrap();

        assert!(repo.remove_subtask(&alice, &task.id, &subtask.id).unwrap());
        assert!(!repo.remove_subtask(&alice, &task.id, &subtask.id).unwrap());
    }

    #[test]
    fn unreachable_database_is_storage_unavailable() {
        let (dir, repo) = repo();
        let path = dir.path().to_path_buf();
        drop(dir);
        assert!(!path.exists());

        let err = repo.list(&UserId::new("alice")).unwrap_err();
        assert!(matches!(err, StoreError::StorageUnavailable(_)), "{err:?}");
    }
}
