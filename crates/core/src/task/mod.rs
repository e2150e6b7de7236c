//! Task queue for tracking conversions of source files.

mod sqlite_store;
mod store;
mod types;

pub use sqlite_store::SqliteTaskStore;
pub use store::{TaskError, TaskStore};
pub use types::{RecycleOutcome, Task, TaskId, TaskStatus, UnknownStatus};
