//! Errors, outcomes and run reports of the jobs.

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::content::{ContentError, FileId};
use crate::converter::ConverterError;
use crate::document::DocumentError;
use crate::task::{TaskError, TaskId, TaskStatus};

/// Errors that abort a job run.
#[derive(Debug, Error)]
pub enum JobError {
    /// Task store error.
    #[error("task store error: {0}")]
    Tasks(#[from] TaskError),

    /// Content store error.
    #[error("content store error: {0}")]
    Content(#[from] ContentError),

    /// Document store error.
    #[error("document store error: {0}")]
    Documents(#[from] DocumentError),
}

/// Errors that stop the worker in the middle of a task.
///
/// The task is left in progress; the expiry sweep recycles it.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Task store error.
    #[error("task store error: {0}")]
    Tasks(#[from] TaskError),

    /// Content store error.
    #[error("content store error: {0}")]
    Content(#[from] ContentError),

    /// Document store error.
    #[error("document store error: {0}")]
    Documents(#[from] DocumentError),

    /// The converter failed.
    #[error("conversion of task {task_id} failed: {source}")]
    Conversion {
        task_id: TaskId,
        #[source]
        source: ConverterError,
    },

    /// Reading the converted output failed.
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A claimed task came back without an attempt token.
    #[error("task {0} was claimed without an attempt")]
    MissingAttempt(TaskId),
}

impl WorkerError {
    /// Whether the failure concerns only the task being processed.
    ///
    /// Task store failures other than a lost claim affect every task and
    /// are reported as internal errors.
    pub fn is_task_scoped(&self) -> bool {
        match self {
            WorkerError::Tasks(TaskError::StaleAttempt { .. }) => true,
            WorkerError::Tasks(_) | WorkerError::MissingAttempt(_) => false,
            _ => true,
        }
    }
}

impl From<JobError> for WorkerError {
    fn from(e: JobError) -> Self {
        match e {
            JobError::Tasks(e) => WorkerError::Tasks(e),
            JobError::Content(e) => WorkerError::Content(e),
            JobError::Documents(e) => WorkerError::Documents(e),
        }
    }
}

/// What a worker invocation did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WorkerOutcome {
    /// No ready task.
    Idle,
    /// The in-progress ceiling is reached.
    Saturated { in_progress: usize, limit: usize },
    /// The targeted task was not ready any more.
    Skipped {
        task_id: TaskId,
        status: Option<TaskStatus>,
    },
    /// Converted and referenced.
    Completed {
        task_id: TaskId,
        derived_file_id: FileId,
        documents_updated: usize,
    },
    /// Given up on for good.
    Failed { task_id: TaskId, reason: String },
}

impl WorkerOutcome {
    /// Whether the invocation changed persisted state.
    pub fn wrote(&self) -> bool {
        matches!(self, WorkerOutcome::Completed { .. } | WorkerOutcome::Failed { .. })
    }
}

/// Summary of one discovery run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiscoveryReport {
    /// Files matching the candidate query.
    pub candidates: usize,
    /// Tasks created.
    pub enqueued: usize,
    /// Tasks created for files no scanned document references.
    pub unreferenced: usize,
    /// Candidates that already had a task or are derived files.
    pub skipped: usize,
    /// Tasks handed to the worker.
    pub dispatched: usize,
    /// Dispatched tasks that completed.
    pub completed: usize,
    /// Dispatched tasks that were marked failed.
    pub failed: usize,
    /// Per-item errors that were logged and skipped.
    pub errors: usize,
}

impl DiscoveryReport {
    /// Task and document writes performed, excluding the checkpoint.
    pub fn writes(&self) -> usize {
        self.enqueued + self.completed + self.failed
    }
}

/// Summary of one reconciliation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Abandoned tasks put back in the queue.
    pub requeued: usize,
    /// Abandoned tasks that ran out of retries.
    pub failed: usize,
    /// Completed tasks whose references were re-checked.
    pub checked: usize,
    /// Derived files re-inserted into documents that lost them.
    pub documents_repaired: usize,
    /// Documents a deleted derived file was removed from.
    pub references_removed: usize,
    /// Tasks deleted because neither file is referenced.
    pub orphans_removed: usize,
    /// Tasks deleted because their original file is gone.
    pub missing_originals_removed: usize,
    /// Per-task errors that were logged and skipped.
    pub errors: usize,
}

impl ReconcileReport {
    /// Task, file and document writes performed.
    pub fn writes(&self) -> usize {
        self.requeued
            + self.failed
            + self.documents_repaired
            + self.references_removed
            + self.orphans_removed
            + self.missing_originals_removed
    }
}
