use crate::error::StoreResult;
use crate::models::{Subtask, SubtaskId, Task, TaskDraft, TaskId, TaskPatch, UserId};

/// Record-oriented access to the task collection.
///
/// Every call is scoped by `user`; single-user backends accept the argument
/// and ignore it. A missing record is reported through the `Option`/`bool`
/// return, never through [`crate::error::StoreError`], which is reserved for
/// storage failures. Identifiers for new tasks and subtasks are assigned here.
pub trait TaskRepository: Send + Sync {
    /// Tasks owned by `user`, in insertion order.
    fn list(&self, user: &UserId) -> StoreResult<Vec<Task>>;

    fn insert(&self, user: &UserId, draft: TaskDraft) -> StoreResult<Task>;

    fn find_one(&self, user: &UserId, task_id: &TaskId) -> StoreResult<Option<Task>>;

    fn update(&self, user: &UserId, task_id: &TaskId, patch: &TaskPatch) -> StoreResult<bool>;

    /// Flips `completed` in a single write and returns the updated task.
    fn toggle(&self, user: &UserId, task_id: &TaskId) -> StoreResult<Option<Task>>;

    /// Removes the task together with all of its subtasks.
    fn delete(&self, user: &UserId, task_id: &TaskId) -> StoreResult<bool>;

    /// Appends a subtask; `None` when the parent does not exist.
    fn push_subtask(&self, user: &UserId, task_id: &TaskId, text: &str)
        -> StoreResult<Option<Subtask>>;

    fn update_subtask(
        &self,
        user: &UserId,
        task_id: &TaskId,
        subtask_id: &SubtaskId,
        completed: bool,
    ) -> StoreResult<bool>;

    /// Flips a subtask's `completed` in a single write.
    fn toggle_subtask(
        &self,
        user: &UserId,
        task_id: &TaskId,
        subtask_id: &SubtaskId,
    ) -> StoreResult<Option<Subtask>>;

    fn remove_subtask(
        &self,
        user: &UserId,
        task_id: &TaskId,
        subtask_id: &SubtaskId,
    ) -> StoreResult<bool>;
}
