//! Document store over content tables of the host database.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, Connection};

use super::{Document, DocumentError, DocumentStore};
use crate::config::ContentArea;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Document store reading and writing the host SQLite database.
///
/// Table and column names come from validated configuration and are
/// interpolated into SQL; all values are bound.
pub struct SqliteDocumentStore {
    conn: Mutex<Connection>,
}

impl SqliteDocumentStore {
    pub fn new(database: &Path) -> Result<Self, DocumentError> {
        let conn = Connection::open(database)?;
        Self::from_connection(conn)
    }

    /// Wrap an existing connection (useful for testing with in-memory tables).
    pub fn from_connection(conn: Connection) -> Result<Self, DocumentError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS transcoder_cache_invalidations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                scope_id INTEGER NOT NULL,
                requested_at INTEGER NOT NULL
            );
            "#,
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, DocumentError> {
        self.conn
            .lock()
            .map_err(|_| DocumentError::Database("document store connection poisoned".to_string()))
    }

    /// Run raw SQL against the host database (fixtures, maintenance).
    pub fn execute_batch(&self, sql: &str) -> Result<(), DocumentError> {
        self.lock()?.execute_batch(sql)?;
        Ok(())
    }

    /// Scopes with a pending cache rebuild, oldest request first.
    pub fn pending_invalidations(&self) -> Result<Vec<i64>, DocumentError> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT scope_id FROM transcoder_cache_invalidations ORDER BY id ASC")?;
        let rows = stmt.query_map([], |row| row.get(0))?;

        let mut scopes = Vec::new();
        for row in rows {
            scopes.push(row?);
        }
        Ok(scopes)
    }

    fn select_sql(area: &ContentArea) -> String {
        let scope = area.scope_column.as_deref().unwrap_or("NULL");
        format!(
            "SELECT id, {column}, {scope} FROM {table}",
            column = area.column,
            scope = scope,
            table = area.table
        )
    }

    fn row_to_document(row: &rusqlite::Row) -> rusqlite::Result<Document> {
        Ok(Document {
            row_id: row.get(0)?,
            content: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
            scope_id: row.get(2)?,
        })
    }
}

/// Escape LIKE wildcards so the needle matches literally.
fn like_pattern(needle: &str) -> String {
    let mut pattern = String::with_capacity(needle.len() + 2);
    pattern.push('%');
    for c in needle.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

impl DocumentStore for SqliteDocumentStore {
    fn find_containing(
        &self,
        area: &ContentArea,
        needle: &str,
    ) -> Result<Vec<Document>, DocumentError> {
        let conn = self.lock()?;
        let sql = format!(
            "{} WHERE {} LIKE ? ESCAPE '\\' ORDER BY id ASC",
            Self::select_sql(area),
            area.column
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![like_pattern(needle)], Self::row_to_document)?;

        let mut documents = Vec::new();
        for row in rows {
            let document = row?;
            // LIKE ignores ASCII case; file names do not.
            if document.content.contains(needle) {
                documents.push(document);
            }
        }
        Ok(documents)
    }

    fn update_content(
        &self,
        area: &ContentArea,
        row_id: i64,
        content: &str,
    ) -> Result<(), DocumentError> {
        let conn = self.lock()?;
        let sql = format!("UPDATE {} SET {} = ? WHERE id = ?", area.table, area.column);
        let updated = conn.execute(&sql, params![content, row_id])?;
        if updated == 0 {
            return Err(DocumentError::NotFound {
                table: area.table.clone(),
                row_id,
            });
        }
        Ok(())
    }

    fn invalidate_cache(&self, scope_id: i64) -> Result<(), DocumentError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO transcoder_cache_invalidations (scope_id, requested_at) VALUES (?, ?)",
            params![scope_id, Utc::now().timestamp()],
        )?;
        Ok(())
    }
}
