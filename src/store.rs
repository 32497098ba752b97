use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::models::{
    parse_due_date, Priority, Subtask, SubtaskId, Task, TaskDraft, TaskId, TaskPatch, UserId,
};
use crate::query::TaskQuery;
use crate::repository::TaskRepository;

/// Requested changes to an existing task. An empty `due_date` string clears
/// the date.
#[derive(Debug, Clone, Default)]
pub struct TaskEdit {
    pub text: Option<String>,
    pub priority: Option<String>,
    pub due_date: Option<String>,
}

/// Task and subtask operations for an authenticated user.
///
/// Validation and default-field policy live here; reads and writes go through
/// the configured [`TaskRepository`].
#[derive(Clone)]
pub struct TaskStore {
    repo: Arc<dyn TaskRepository>,
}

impl TaskStore {
    pub fn new(repo: Arc<dyn TaskRepository>) -> Self {
        Self { repo }
    }

    pub fn create_task(
        &self,
        user: &UserId,
        text: &str,
        priority: Option<&str>,
        due_date: Option<&str>,
    ) -> StoreResult<Task> {
        let draft = TaskDraft {
            text: validate_text(text, "task")?,
            priority: validate_priority(priority)?.unwrap_or_default(),
            due_date: match due_date {
                Some(value) => validate_due_date(value)?,
                None => None,
            },
        };

        let task = self.repo.insert(user, draft)?;
        info!(user_id = %user, task_id = %task.id, "task created");
        Ok(task)
    }

    pub fn list_tasks(&self, user: &UserId, query: Option<&TaskQuery>) -> StoreResult<Vec<Task>> {
        let tasks = self.repo.list(user)?;
        let tasks = match query {
            Some(query) => query.apply(tasks),
            None => tasks,
        };
        debug!(user_id = %user, count = tasks.len(), "tasks listed");
        Ok(tasks)
    }

    pub fn get_task(&self, user: &UserId, task_id: &TaskId) -> StoreResult<Task> {
        self.repo
            .find_one(user, task_id)?
            .ok_or_else(|| StoreError::task_not_found(task_id))
    }

    pub fn toggle_task(&self, user: &UserId, task_id: &TaskId) -> StoreResult<Task> {
        let task = self
            .repo
            .toggle(user, task_id)?
            .ok_or_else(|| StoreError::task_not_found(task_id))?;
        info!(user_id = %user, task_id = %task_id, completed = task.completed, "task toggled");
        Ok(task)
    }

    pub fn edit_task(&self, user: &UserId, task_id: &TaskId, edit: TaskEdit) -> StoreResult<Task> {
        let patch = TaskPatch {
            text: edit
                .text
                .as_deref()
                .map(|text| validate_text(text, "task"))
                .transpose()?,
            completed: None,
            priority: validate_priority(edit.priority.as_deref())?,
            due_date: edit
                .due_date
                .as_deref()
                .map(validate_due_date)
                .transpose()?,
        };
        if patch.is_empty() {
            return Err(StoreError::validation("no fields to update"));
        }

        if !self.repo.update(user, task_id, &patch)? {
            return Err(StoreError::task_not_found(task_id));
        }
        info!(user_id = %user, task_id = %task_id, "task edited");
        self.get_task(user, task_id)
    }

    pub fn delete_task(&self, user: &UserId, task_id: &TaskId) -> StoreResult<()> {
        if !self.repo.delete(user, task_id)? {
            return Err(StoreError::task_not_found(task_id));
        }
        info!(user_id = %user, task_id = %task_id, "task deleted");
        Ok(())
    }

    pub fn add_subtask(&self, user: &UserId, task_id: &TaskId, text: &str) -> StoreResult<Subtask> {
        let text = validate_text(text, "subtask")?;
        let subtask = self
            .repo
            .push_subtask(user, task_id, &text)?
            .ok_or_else(|| StoreError::parent_not_found(task_id))?;
        info!(user_id = %user, task_id = %task_id, subtask_id = %subtask.id, "subtask added");
        Ok(subtask)
    }

    pub fn toggle_subtask(
        &self,
        user: &UserId,
        task_id: &TaskId,
        subtask_id: &SubtaskId,
    ) -> StoreResult<Subtask> {
        let subtask = self
            .repo
            .toggle_subtask(user, task_id, subtask_id)?
            .ok_or_else(|| StoreError::subtask_not_found(subtask_id))?;
        info!(
            user_id = %user,
            task_id = %task_id,
            subtask_id = %subtask_id,
            completed = subtask.completed,
            "subtask toggled"
        );
        Ok(subtask)
    }

    /// Removing a subtask that is already gone is `NotFound`.
    pub fn remove_subtask(
        &self,
        user: &UserId,
        task_id: &TaskId,
        subtask_id: &SubtaskId,
    ) -> StoreResult<()> {
        if !self.repo.remove_subtask(user, task_id, subtask_id)? {
            return Err(StoreError::subtask_not_found(subtask_id));
        }
        info!(user_id = %user, task_id = %task_id, subtask_id = %subtask_id, "subtask removed");
        Ok(())
    }
}

fn validate_text(text: &str, what: &str) -> StoreResult<String> {
    let text = text.trim();
    if text.is_empty() {
        return Err(StoreError::validation(format!("{what} text cannot be empty")));
    }
    Ok(text.to_string())
}

fn validate_priority(priority: Option<&str>) -> StoreResult<Option<Priority>> {
    priority
        .map(|value| value.parse::<Priority>().map_err(StoreError::Validation))
        .transpose()
}

fn validate_due_date(value: &str) -> StoreResult<Option<chrono::NaiveDate>> {
    parse_due_date(value)
        .map_err(|_| StoreError::validation(format!("due date `{value}` is not YYYY-MM-DD")))
}
