//! SQLite-backed task store implementation.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};

use super::{RecycleOutcome, Task, TaskError, TaskId, TaskStatus, TaskStore};
use crate::content::FileId;

/// Columns selected for every task query, in `row_to_task` order.
const TASK_COLUMNS: &str =
    "id, source_file_id, derived_file_id, status, attempt, queued_at, started_at, finished_at, retry_count";

/// How long a connection waits for another writer before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-backed task store.
///
/// Several processes may open the same database file; every state transition
/// is a single conditional statement, so claims never collide.
pub struct SqliteTaskStore {
    conn: Mutex<Connection>,
}

impl SqliteTaskStore {
    /// Create a new SQLite task store, creating the database file and tables if needed.
    pub fn new(path: &Path) -> Result<Self, TaskError> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Create an in-memory SQLite task store (useful for testing).
    pub fn in_memory() -> Result<Self, TaskError> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, TaskError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), TaskError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS transcode_tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source_file_id INTEGER NOT NULL,
                derived_file_id INTEGER,
                status TEXT NOT NULL,
                attempt TEXT,
                queued_at TEXT NOT NULL,
                started_at TEXT,
                finished_at TEXT,
                retry_count INTEGER NOT NULL DEFAULT 0
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_tasks_active_source
                ON transcode_tasks(source_file_id)
                WHERE status IN ('ready', 'in_progress');
            CREATE INDEX IF NOT EXISTS idx_tasks_status_queue
                ON transcode_tasks(status, queued_at, id);
            CREATE INDEX IF NOT EXISTS idx_tasks_source ON transcode_tasks(source_file_id);

            CREATE TABLE IF NOT EXISTS transcoder_checkpoints (
                name TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )?;

        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, TaskError> {
        self.conn
            .lock()
            .map_err(|_| TaskError::Database("task store connection poisoned".to_string()))
    }

    /// Queue a task with an explicit queue time.
    ///
    /// [`TaskStore::insert`] uses the current time; this exists so that FIFO
    /// ordering can be driven deterministically.
    pub fn insert_at(
        &self,
        source_file_id: FileId,
        queued_at: DateTime<Utc>,
    ) -> Result<Task, TaskError> {
        let conn = self.lock()?;

        let result = conn.execute(
            "INSERT INTO transcode_tasks (source_file_id, status, queued_at, retry_count) VALUES (?, ?, ?, 0)",
            params![
                source_file_id,
                TaskStatus::Ready.as_str(),
                format_timestamp(queued_at)
            ],
        );

        match result {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                return Err(TaskError::ActiveTaskExists(source_file_id));
            }
            Err(e) => return Err(e.into()),
        }

        let id = conn.last_insert_rowid();
        Self::fetch(&conn, id)?.ok_or(TaskError::NotFound(id))
    }

    fn fetch(conn: &Connection, id: TaskId) -> Result<Option<Task>, TaskError> {
        let sql = format!("SELECT {} FROM transcode_tasks WHERE id = ?", TASK_COLUMNS);
        Ok(conn
            .query_row(&sql, params![id], Self::row_to_task)
            .optional()?)
    }

    fn query_tasks(
        conn: &Connection,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<Task>, TaskError> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, Self::row_to_task)?;

        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row?);
        }
        Ok(tasks)
    }

    /// Explains why an owned-attempt write matched no row.
    fn ownership_error(conn: &Connection, id: TaskId, attempt: &str) -> TaskError {
        match Self::fetch(conn, id) {
            Ok(Some(_)) => TaskError::StaleAttempt {
                task_id: id,
                attempt: attempt.to_string(),
            },
            Ok(None) => TaskError::NotFound(id),
            Err(e) => e,
        }
    }

    fn row_to_task(row: &rusqlite::Row) -> rusqlite::Result<Task> {
        let status_str: String = row.get(3)?;
        let status = status_str
            .parse::<TaskStatus>()
            .map_err(|e| conversion_error(3, e))?;

        Ok(Task {
            id: row.get(0)?,
            source_file_id: row.get(1)?,
            derived_file_id: row.get(2)?,
            status,
            attempt: row.get(4)?,
            queued_at: parse_timestamp(5, row.get(5)?)?,
            started_at: row
                .get::<_, Option<String>>(6)?
                .map(|s| parse_timestamp(6, s))
                .transpose()?,
            finished_at: row
                .get::<_, Option<String>>(7)?
                .map(|s| parse_timestamp(7, s))
                .transpose()?,
            retry_count: row.get(8)?,
        })
    }
}

/// Fixed-width UTC timestamps compare correctly as text.
pub(crate) fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(idx: usize, value: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn conversion_error<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}

fn new_attempt() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl TaskStore for SqliteTaskStore {
    fn insert(&self, source_file_id: FileId) -> Result<Task, TaskError> {
        self.insert_at(source_file_id, Utc::now())
    }

    fn get(&self, id: TaskId) -> Result<Option<Task>, TaskError> {
        let conn = self.lock()?;
        Self::fetch(&conn, id)
    }

    fn find_by_source(&self, source_file_id: FileId) -> Result<Vec<Task>, TaskError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM transcode_tasks WHERE source_file_id = ? ORDER BY queued_at ASC, id ASC",
            TASK_COLUMNS
        );
        Self::query_tasks(&conn, &sql, params![source_file_id])
    }

    fn claim_next(&self) -> Result<Option<Task>, TaskError> {
        let conn = self.lock()?;
        let sql = format!(
            "UPDATE transcode_tasks SET status = ?1, started_at = ?2, attempt = ?3
             WHERE id = (
                 SELECT id FROM transcode_tasks WHERE status = ?4
                 ORDER BY queued_at ASC, id ASC LIMIT 1
             ) AND status = ?4
             RETURNING {}",
            TASK_COLUMNS
        );

        Ok(conn
            .query_row(
                &sql,
                params![
                    TaskStatus::InProgress.as_str(),
                    format_timestamp(Utc::now()),
                    new_attempt(),
                    TaskStatus::Ready.as_str(),
                ],
                Self::row_to_task,
            )
            .optional()?)
    }

    fn claim(&self, id: TaskId) -> Result<Option<Task>, TaskError> {
        let conn = self.lock()?;
        let sql = format!(
            "UPDATE transcode_tasks SET status = ?1, started_at = ?2, attempt = ?3
             WHERE id = ?4 AND status = ?5
             RETURNING {}",
            TASK_COLUMNS
        );

        Ok(conn
            .query_row(
                &sql,
                params![
                    TaskStatus::InProgress.as_str(),
                    format_timestamp(Utc::now()),
                    new_attempt(),
                    id,
                    TaskStatus::Ready.as_str(),
                ],
                Self::row_to_task,
            )
            .optional()?)
    }

    fn mark_completed(
        &self,
        id: TaskId,
        attempt: &str,
        derived_file_id: FileId,
    ) -> Result<Task, TaskError> {
        let conn = self.lock()?;
        let sql = format!(
            "UPDATE transcode_tasks
             SET status = ?1, derived_file_id = ?2, finished_at = ?3, attempt = NULL
             WHERE id = ?4 AND status = ?5 AND attempt = ?6
             RETURNING {}",
            TASK_COLUMNS
        );

        let updated = conn
            .query_row(
                &sql,
                params![
                    TaskStatus::Completed.as_str(),
                    derived_file_id,
                    format_timestamp(Utc::now()),
                    id,
                    TaskStatus::InProgress.as_str(),
                    attempt,
                ],
                Self::row_to_task,
            )
            .optional()?;

        updated.ok_or_else(|| Self::ownership_error(&conn, id, attempt))
    }

    fn mark_failed(&self, id: TaskId, attempt: &str) -> Result<Task, TaskError> {
        let conn = self.lock()?;
        let sql = format!(
            "UPDATE transcode_tasks
             SET status = ?1, finished_at = ?2, attempt = NULL
             WHERE id = ?3 AND status = ?4 AND attempt = ?5
             RETURNING {}",
            TASK_COLUMNS
        );

        let updated = conn
            .query_row(
                &sql,
                params![
                    TaskStatus::Failed.as_str(),
                    format_timestamp(Utc::now()),
                    id,
                    TaskStatus::InProgress.as_str(),
                    attempt,
                ],
                Self::row_to_task,
            )
            .optional()?;

        updated.ok_or_else(|| Self::ownership_error(&conn, id, attempt))
    }

    fn owns(&self, id: TaskId, attempt: &str) -> Result<(), TaskError> {
        let conn = self.lock()?;
        let owned: Option<TaskId> = conn
            .query_row(
                "SELECT id FROM transcode_tasks WHERE id = ?1 AND status = ?2 AND attempt = ?3",
                params![id, TaskStatus::InProgress.as_str(), attempt],
                |row| row.get(0),
            )
            .optional()?;

        match owned {
            Some(_) => Ok(()),
            None => Err(Self::ownership_error(&conn, id, attempt)),
        }
    }

    fn recycle_expired(
        &self,
        older_than: DateTime<Utc>,
        max_retries: u32,
    ) -> Result<RecycleOutcome, TaskError> {
        let mut conn = self.lock()?;
        let cutoff = format_timestamp(older_than);
        let tx = conn.transaction()?;

        // Fail first, so tasks requeued below are not failed in the same sweep.
        let failed = tx.execute(
            "UPDATE transcode_tasks SET status = ?1, finished_at = ?2, attempt = NULL
             WHERE status = ?3 AND started_at <= ?4 AND retry_count > ?5",
            params![
                TaskStatus::Failed.as_str(),
                format_timestamp(Utc::now()),
                TaskStatus::InProgress.as_str(),
                cutoff,
                max_retries,
            ],
        )?;

        let requeued = tx.execute(
            "UPDATE transcode_tasks SET status = ?1, attempt = NULL, retry_count = retry_count + 1
             WHERE status = ?2 AND started_at <= ?3 AND retry_count <= ?4",
            params![
                TaskStatus::Ready.as_str(),
                TaskStatus::InProgress.as_str(),
                cutoff,
                max_retries,
            ],
        )?;

        tx.commit()?;

        Ok(RecycleOutcome { requeued, failed })
    }

    fn list_by_status(&self, status: TaskStatus) -> Result<Vec<Task>, TaskError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM transcode_tasks WHERE status = ? ORDER BY queued_at ASC, id ASC",
            TASK_COLUMNS
        );
        Self::query_tasks(&conn, &sql, params![status.as_str()])
    }

    fn count_by_status(&self, status: TaskStatus) -> Result<usize, TaskError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM transcode_tasks WHERE status = ?",
            params![status.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn delete(&self, id: TaskId) -> Result<Task, TaskError> {
        let conn = self.lock()?;

        let task = Self::fetch(&conn, id)?.ok_or(TaskError::NotFound(id))?;
        conn.execute("DELETE FROM transcode_tasks WHERE id = ?", params![id])?;

        Ok(task)
    }

    fn checkpoint(&self, name: &str) -> Result<Option<DateTime<Utc>>, TaskError> {
        let conn = self.lock()?;
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM transcoder_checkpoints WHERE name = ?",
                params![name],
                |row| row.get(0),
            )
            .optional()?;

        value
            .map(|v| parse_timestamp(0, v).map_err(TaskError::from))
            .transpose()
    }

    fn set_checkpoint(&self, name: &str, value: DateTime<Utc>) -> Result<(), TaskError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO transcoder_checkpoints (name, value) VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET value = excluded.value",
            params![name, format_timestamp(value)],
        )?;
        Ok(())
    }
}
