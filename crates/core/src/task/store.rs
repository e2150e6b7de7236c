//! Task storage trait and errors.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::content::FileId;
use crate::task::{RecycleOutcome, Task, TaskId, TaskStatus};

/// Error type for task operations.
#[derive(Debug, Error)]
pub enum TaskError {
    /// Task not found.
    #[error("task not found: {0}")]
    NotFound(TaskId),

    /// A ready or in-progress task already exists for the source file.
    #[error("source file {0} already has an active task")]
    ActiveTaskExists(FileId),

    /// The claim used for a write no longer owns the task.
    #[error("attempt {attempt} no longer owns task {task_id}")]
    StaleAttempt { task_id: TaskId, attempt: String },

    /// Database error.
    #[error("database error: {0}")]
    Database(String),
}

impl From<rusqlite::Error> for TaskError {
    fn from(e: rusqlite::Error) -> Self {
        TaskError::Database(e.to_string())
    }
}

/// Durable table of conversion tasks.
///
/// Claims are atomic: concurrent callers, in the same process or not, never
/// receive the same task.
pub trait TaskStore: Send + Sync {
    /// Queue a new task for a source file.
    ///
    /// Fails with [`TaskError::ActiveTaskExists`] if the source already has a
    /// ready or in-progress task.
    fn insert(&self, source_file_id: FileId) -> Result<Task, TaskError>;

    /// Get a task by ID.
    fn get(&self, id: TaskId) -> Result<Option<Task>, TaskError>;

    /// All tasks ever created for a source file, oldest first.
    fn find_by_source(&self, source_file_id: FileId) -> Result<Vec<Task>, TaskError>;

    /// Claim the oldest ready task, moving it to in progress.
    fn claim_next(&self) -> Result<Option<Task>, TaskError>;

    /// Claim a specific task. Returns `None` if it is not ready.
    fn claim(&self, id: TaskId) -> Result<Option<Task>, TaskError>;

    /// Complete a task owned by `attempt`.
    fn mark_completed(
        &self,
        id: TaskId,
        attempt: &str,
        derived_file_id: FileId,
    ) -> Result<Task, TaskError>;

    /// Check that `attempt` still owns the in-progress task.
    ///
    /// Fails with [`TaskError::StaleAttempt`] once the task was recycled,
    /// reclaimed or finished, and with [`TaskError::NotFound`] if it is gone.
    fn owns(&self, id: TaskId, attempt: &str) -> Result<(), TaskError>;

    /// Fail a task owned by `attempt`.
    fn mark_failed(&self, id: TaskId, attempt: &str) -> Result<Task, TaskError>;

    /// Recycle in-progress tasks started at or before `older_than`.
    ///
    /// Tasks with `retry_count > max_retries` fail; the rest go back to ready
    /// with their retry count incremented.
    fn recycle_expired(
        &self,
        older_than: DateTime<Utc>,
        max_retries: u32,
    ) -> Result<RecycleOutcome, TaskError>;

    /// Tasks with the given status ordered by `(queued_at, id)`.
    fn list_by_status(&self, status: TaskStatus) -> Result<Vec<Task>, TaskError>;

    /// Number of tasks with the given status.
    fn count_by_status(&self, status: TaskStatus) -> Result<usize, TaskError>;

    /// Permanently delete a task. Returns the deleted task.
    fn delete(&self, id: TaskId) -> Result<Task, TaskError>;

    /// Read a named timestamp (e.g. the discovery high-water mark).
    fn checkpoint(&self, name: &str) -> Result<Option<DateTime<Utc>>, TaskError>;

    /// Write a named timestamp.
    fn set_checkpoint(&self, name: &str, value: DateTime<Utc>) -> Result<(), TaskError>;
}
