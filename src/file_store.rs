//! Single-user task storage in one JSON file.
//!
//! Every write reads the whole collection, mutates it in memory and writes it
//! back through a temporary sibling file that is renamed over the target, so
//! readers never observe a half-written file. There is no lock: two writers
//! racing on the same file lose updates, and the last rename wins.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::StoreResult;
use crate::models::{Subtask, SubtaskId, Task, TaskDraft, TaskId, TaskPatch, UserId};
use crate::repository::TaskRepository;

pub struct JsonFileRepository {
    path: PathBuf,
}

impl JsonFileRepository {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Creates an empty collection if the file does not exist yet.
    pub fn ensure_exists(&self) -> StoreResult<()> {
        if !self.path.exists() {
            self.write_all(&[])?;
        }
        Ok(())
    }

    fn read_all(&self) -> StoreResult<Vec<Task>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&raw)?)
    }

    fn write_all(&self, tasks: &[Task]) -> StoreResult<()> {
        let body = serde_json::to_vec_pretty(tasks)?;
        let tmp = self.tmp_path();

        let result = fs::File::create(&tmp)
            .and_then(|mut file| {
                file.write_all(&body)?;
                file.sync_all()
            })
            .and_then(|()| fs::rename(&tmp, &self.path));
        if let Err(err) = result {
            let _ = fs::remove_file(&tmp);
            return Err(err.into());
        }
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "tasks.json".to_string());
        self.path
            .with_file_name(format!(".{name}.{}.tmp", Uuid::new_v4().simple()))
    }

    /// Runs `mutate` against the whole collection and writes it back when the
    /// closure reports a change.
    fn modify<T>(
        &self,
        mutate: impl FnOnce(&mut Vec<Task>) -> Option<T>,
    ) -> StoreResult<Option<T>> {
        let mut tasks = self.read_all()?;
        let outcome = mutate(&mut tasks);
        if outcome.is_some() {
            self.write_all(&tasks)?;
        }
        Ok(outcome)
    }
}

impl TaskRepository for JsonFileRepository {
    fn list(&self, _user: &UserId) -> StoreResult<Vec<Task>> {
        self.read_all()
    }

    fn insert(&self, _user: &UserId, draft: TaskDraft) -> StoreResult<Task> {
        let task = Task {
            id: TaskId::generate(),
            user_id: None,
            text: draft.text,
            completed: false,
            priority: draft.priority,
            due_date: draft.due_date,
            subtasks: Vec::new(),
        };
        let mut tasks = self.read_all()?;
        tasks.push(task.clone());
        self.write_all(&tasks)?;
        Ok(task)
    }

    fn find_one(&self, _user: &UserId, task_id: &TaskId) -> StoreResult<Option<Task>> {
        Ok(self
            .read_all()?
            .into_iter()
            .find(|task| &task.id == task_id))
    }

    fn update(&self, _user: &UserId, task_id: &TaskId, patch: &TaskPatch) -> StoreResult<bool> {
        let updated = self.modify(|tasks| {
            let task = tasks.iter_mut().find(|task| &task.id == task_id)?;
            patch.apply_to(task);
            Some(())
        })?;
        Ok(updated.is_some())
    }

    fn toggle(&self, _user: &UserId, task_id: &TaskId) -> StoreResult<Option<Task>> {
        self.modify(|tasks| {
            let task = tasks.iter_mut().find(|task| &task.id == task_id)?;
            task.completed = !task.completed;
            Some(task.clone())
        })
    }

    fn delete(&self, _user: &UserId, task_id: &TaskId) -> StoreResult<bool> {
        let deleted = self.modify(|tasks| {
            let index = tasks.iter().position(|task| &task.id == task_id)?;
            tasks.remove(index);
            Some(())
        })?;
        Ok(deleted.is_some())
    }

    fn push_subtask(
        &self,
        _user: &UserId,
        task_id: &TaskId,
        text: &str,
    ) -> StoreResult<Option<Subtask>> {
        self.modify(|tasks| {
            let task = tasks.iter_mut().find(|task| &task.id == task_id)?;
            let subtask = Subtask {
                id: SubtaskId::generate(),
                text: text.to_string(),
                completed: false,
            };
            task.subtasks.push(subtask.clone());
            Some(subtask)
        })
    }

    fn update_subtask(
        &self,
        _user: &UserId,
        task_id: &TaskId,
        subtask_id: &SubtaskId,
        completed: bool,
    ) -> StoreResult<bool> {
        let updated = self.modify(|tasks| {
            let task = tasks.iter_mut().find(|task| &task.id == task_id)?;
            task.subtask_mut(subtask_id)?.completed = completed;
            Some(())
        })?;
        Ok(updated.is_some())
    }

    fn toggle_subtask(
        &self,
        _user: &UserId,
        task_id: &TaskId,
        subtask_id: &SubtaskId,
    ) -> StoreResult<Option<Subtask>> {
        self.modify(|tasks| {
            let task = tasks.iter_mut().find(|task| &task.id == task_id)?;
            let subtask = task.subtask_mut(subtask_id)?;
            subtask.completed = !subtask.completed;
            Some(subtask.clone())
        })
    }

    fn remove_subtask(
        &self,
        _user: &UserId,
        task_id: &TaskId,
        subtask_id: &SubtaskId,
    ) -> StoreResult<bool> {
        let removed = self.modify(|tasks| {
            let task = tasks.iter_mut().find(|task| &task.id == task_id)?;
            let index = task
                .subtasks
                .iter()
                .position(|subtask| &subtask.id == subtask_id)?;
            task.subtasks.remove(index);
            Some(())
        })?;
        Ok(removed.is_some())
    }
}
