//! Task types and the conversion state machine.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::content::FileId;

/// Identifier of a task row. Assigned by the store, increasing with insertion.
pub type TaskId = i64;

/// Status of a conversion task.
///
/// `Ready -> InProgress -> {Completed, Failed}`; `InProgress` may also be
/// recycled back to `Ready` by the expiry sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Queued, waiting for a worker.
    Ready,
    /// Claimed by a worker.
    InProgress,
    /// Converted and referenced.
    Completed,
    /// Given up on.
    Failed,
}

impl TaskStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [TaskStatus; 4] = [
        TaskStatus::Ready,
        TaskStatus::InProgress,
        TaskStatus::Completed,
        TaskStatus::Failed,
    ];

    /// Name used in the database and in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Ready => "ready",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    /// Whether the task has left the queue for good.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for an unknown status string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown task status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for TaskStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ready" => Ok(TaskStatus::Ready),
            "in_progress" => Ok(TaskStatus::InProgress),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// One unit of work: convert one source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    /// File record being converted.
    pub source_file_id: FileId,
    /// File record produced by the conversion. Set on completion.
    pub derived_file_id: Option<FileId>,
    pub status: TaskStatus,
    /// Token of the claim currently owning the task. Only set while in progress.
    pub attempt: Option<String>,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Times the task was recycled after being abandoned in progress.
    pub retry_count: u32,
}

impl Task {
    /// Seconds between claim and completion, if both happened.
    pub fn elapsed_secs(&self) -> Option<i64> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some((end - start).num_seconds()),
            _ => None,
        }
    }
}

/// Result of one expiry sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecycleOutcome {
    /// Tasks put back to `Ready`.
    pub requeued: usize,
    /// Tasks moved to `Failed` because their retries ran out.
    pub failed: usize,
}

impl RecycleOutcome {
    /// Rows touched by the sweep.
    pub fn total(&self) -> usize {
        self.requeued + self.failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_str() {
        for status in TaskStatus::ALL {
            assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
        }
        assert!("queued".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!TaskStatus::Ready.is_terminal());
        assert!(!TaskStatus::InProgress.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&TaskStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
    }

    #[test]
    fn test_elapsed_secs() {
        let start = Utc::now();
        let task = Task {
            id: 1,
            source_file_id: 10,
            derived_file_id: Some(11),
            status: TaskStatus::Completed,
            attempt: None,
            queued_at: start,
            started_at: Some(start),
            finished_at: Some(start + chrono::Duration::seconds(42)),
            retry_count: 0,
        };
        assert_eq!(task.elapsed_secs(), Some(42));
    }
}
