//! Content store over the host's `files` table and blob directory.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use tracing::{debug, warn};

use super::{CandidateQuery, ContentError, ContentStore, FileId, NewFile, StoredFile};

const FILE_COLUMNS: &str = "id, contenthash, contextid, component, filearea, itemid, filepath, \
                            filename, mimetype, filesize, timecreated, timemodified";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Content store backed by the host SQLite database and a blob directory.
///
/// Blobs live at `<data_root>/filedir/<h[0..2]>/<h[2..4]>/<hash>`; removed blobs
/// are moved to `<data_root>/trashdir/<hash>`.
pub struct SqliteContentStore {
    conn: Mutex<Connection>,
    data_root: PathBuf,
}

impl SqliteContentStore {
    /// Open the host database at `database` with blobs under `data_root`.
    pub fn new(database: &Path, data_root: &Path) -> Result<Self, ContentError> {
        let conn = Connection::open(database)?;
        Self::from_connection(conn, data_root)
    }

    /// In-memory file table with blobs under `data_root` (useful for testing).
    pub fn in_memory(data_root: &Path) -> Result<Self, ContentError> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, data_root)
    }

    fn from_connection(conn: Connection, data_root: &Path) -> Result<Self, ContentError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS files (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                contenthash TEXT NOT NULL,
                pathnamehash TEXT NOT NULL UNIQUE,
                contextid INTEGER NOT NULL,
                component TEXT NOT NULL,
                filearea TEXT NOT NULL,
                itemid INTEGER NOT NULL,
                filepath TEXT NOT NULL,
                filename TEXT NOT NULL,
                mimetype TEXT,
                filesize INTEGER NOT NULL,
                timecreated INTEGER NOT NULL,
                timemodified INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_files_contenthash ON files(contenthash);
            CREATE INDEX IF NOT EXISTS idx_files_timemodified ON files(timemodified);
            "#,
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
            data_root: data_root.to_path_buf(),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, ContentError> {
        self.conn
            .lock()
            .map_err(|_| ContentError::Database("content store connection poisoned".to_string()))
    }

    /// Directory removed blobs are moved to.
    pub fn trash_dir(&self) -> PathBuf {
        self.data_root.join("trashdir")
    }

    /// Insert a record without touching the blob store, stamped with `at`.
    pub fn insert_record(
        &self,
        file: &NewFile,
        at: DateTime<Utc>,
    ) -> Result<StoredFile, ContentError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO files (contenthash, pathnamehash, contextid, component, filearea, itemid,
                                filepath, filename, mimetype, filesize, timecreated, timemodified)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                file.content_hash,
                file.path_hash(),
                file.context_id,
                file.component,
                file.file_area,
                file.item_id,
                file.file_path,
                file.filename,
                file.mimetype,
                file.size as i64,
                at.timestamp(),
                at.timestamp(),
            ],
        )?;

        let id = conn.last_insert_rowid();
        Self::fetch(&conn, id)?.ok_or(ContentError::NotFound(id))
    }

    fn fetch(conn: &Connection, id: FileId) -> Result<Option<StoredFile>, ContentError> {
        let sql = format!("SELECT {} FROM files WHERE id = ?", FILE_COLUMNS);
        Ok(conn
            .query_row(&sql, params![id], Self::row_to_file)
            .optional()?)
    }

    fn row_to_file(row: &rusqlite::Row) -> rusqlite::Result<StoredFile> {
        let size: i64 = row.get(9)?;
        Ok(StoredFile {
            id: row.get(0)?,
            content_hash: row.get(1)?,
            context_id: row.get(2)?,
            component: row.get(3)?,
            file_area: row.get(4)?,
            item_id: row.get(5)?,
            file_path: row.get(6)?,
            filename: row.get(7)?,
            mimetype: row.get(8)?,
            size: size.max(0) as u64,
            time_created: from_unix(row.get(10)?),
            time_modified: from_unix(row.get(11)?),
        })
    }
}

fn from_unix(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

/// Rename, falling back to copy and remove across filesystems.
fn move_file(source: &Path, destination: &Path) -> Result<(), ContentError> {
    if let Some(parent) = destination.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ContentError::io(parent, e))?;
    }

    match std::fs::rename(source, destination) {
        Ok(()) => Ok(()),
        Err(e) => {
            debug!(
                source = %source.display(),
                destination = %destination.display(),
                error = %e,
                "Rename failed, falling back to copy"
            );
            std::fs::copy(source, destination).map_err(|e| ContentError::io(destination, e))?;
            std::fs::remove_file(source).map_err(|e| ContentError::io(source, e))
        }
    }
}

impl ContentStore for SqliteContentStore {
    fn get_file(&self, id: FileId) -> Result<Option<StoredFile>, ContentError> {
        let conn = self.lock()?;
        Self::fetch(&conn, id)
    }

    fn find_sibling(
        &self,
        near: &StoredFile,
        filename: &str,
    ) -> Result<Option<StoredFile>, ContentError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM files
             WHERE contextid = ? AND component = ? AND filearea = ? AND filename = ?
             ORDER BY id ASC LIMIT 1",
            FILE_COLUMNS
        );
        Ok(conn
            .query_row(
                &sql,
                params![near.context_id, near.component, near.file_area, filename],
                Self::row_to_file,
            )
            .optional()?)
    }

    fn find_candidates(&self, query: &CandidateQuery) -> Result<Vec<StoredFile>, ContentError> {
        if query.components.is_empty() || query.mimetypes.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = |n: usize| vec!["?"; n].join(", ");
        let sql = format!(
            "SELECT {} FROM files
             WHERE timemodified > ?
               AND component IN ({})
               AND mimetype IN ({})
             ORDER BY id ASC",
            FILE_COLUMNS,
            placeholders(query.components.len()),
            placeholders(query.mimetypes.len()),
        );

        let mut values = vec![Value::Integer(query.modified_after.timestamp())];
        values.extend(query.components.iter().cloned().map(Value::Text));
        values.extend(query.mimetypes.iter().cloned().map(Value::Text));

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), Self::row_to_file)?;

        let mut files = Vec::new();
        for row in rows {
            files.push(row?);
        }
        Ok(files)
    }

    fn blob_path(&self, content_hash: &str) -> PathBuf {
        let mut path = self.data_root.join("filedir");
        if content_hash.len() >= 4 && content_hash.is_ascii() {
            path.push(&content_hash[0..2]);
            path.push(&content_hash[2..4]);
        }
        path.join(content_hash)
    }

    fn staging_dir(&self) -> PathBuf {
        self.data_root.join("temp").join("transcoder")
    }

    fn insert_file(&self, file: &NewFile, staged: &Path) -> Result<StoredFile, ContentError> {
        let destination = self.blob_path(&file.content_hash);
        if destination.exists() {
            // Same content already stored.
            std::fs::remove_file(staged).map_err(|e| ContentError::io(staged, e))?;
        } else {
            move_file(staged, &destination)?;
        }

        self.insert_record(file, Utc::now())
    }

    fn delete_file(&self, id: FileId) -> Result<Option<StoredFile>, ContentError> {
        let conn = self.lock()?;
        let Some(file) = Self::fetch(&conn, id)? else {
            return Ok(None);
        };
        conn.execute("DELETE FROM files WHERE id = ?", params![id])?;
        Ok(Some(file))
    }

    fn hash_in_use(&self, content_hash: &str) -> Result<bool, ContentError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM files WHERE contenthash = ?",
            params![content_hash],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn trash_blob(&self, content_hash: &str) -> Result<(), ContentError> {
        let source = self.blob_path(content_hash);
        if !source.exists() {
            warn!(content_hash = %content_hash, "Blob already gone, nothing to trash");
            return Ok(());
        }

        let destination = self.trash_dir().join(content_hash);
        move_file(&source, &destination)?;
        debug!(content_hash = %content_hash, "Moved blob to trash");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use tempfile::TempDir;

    fn create_test_store() -> (SqliteContentStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = SqliteContentStore::in_memory(temp_dir.path()).unwrap();
        (store, temp_dir)
    }

    fn new_file(hash: &str, filename: &str, mimetype: &str) -> NewFile {
        NewFile {
            content_hash: hash.to_string(),
            context_id: 5,
            component: "mod_page".to_string(),
            file_area: "content".to_string(),
            item_id: 0,
            file_path: "/".to_string(),
            filename: filename.to_string(),
            mimetype: Some(mimetype.to_string()),
            size: 3,
        }
    }

    fn stage(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn test_blob_path_layout() {
        let (store, dir) = create_test_store();
        let path = store.blob_path("abcdef0123");
        assert_eq!(
            path,
            dir.path().join("filedir").join("ab").join("cd").join("abcdef0123")
        );
    }

    #[test]
    fn test_insert_file_moves_staged_blob() {
        let (store, dir) = create_test_store();
        let staged = stage(dir.path(), "out.mp4", b"mp4");

        let file = store
            .insert_file(&new_file("abcd1111", "clip.mp4", "video/mp4"), &staged)
            .unwrap();

        assert!(!staged.exists());
        assert!(store.has_blob("abcd1111"));
        assert_eq!(store.get_file(file.id).unwrap().unwrap().filename, "clip.mp4");
    }

    #[test]
    fn test_find_candidates_filters() {
        let (store, _dir) = create_test_store();
        let now = Utc::now();
        let old = now - ChronoDuration::days(3);

        let fresh = store
            .insert_record(&new_file("aa01", "a.webm", "video/webm"), now)
            .unwrap();
        store
            .insert_record(&new_file("aa02", "b.webm", "video/webm"), old)
            .unwrap();
        store
            .insert_record(&new_file("aa03", "c.png", "image/png"), now)
            .unwrap();
        let mut other = new_file("aa04", "d.webm", "video/webm");
        other.component = "mod_forum".to_string();
        store.insert_record(&other, now).unwrap();

        let query = CandidateQuery {
            modified_after: now - ChronoDuration::days(1),
            components: vec!["mod_page".to_string()],
            mimetypes: vec!["video/webm".to_string(), "audio/ogg".to_string()],
        };
        let found = store.find_candidates(&query).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, fresh.id);

        let empty = CandidateQuery {
            components: vec![],
            ..query
        };
        assert!(store.find_candidates(&empty).unwrap().is_empty());
    }

    #[test]
    fn test_find_sibling() {
        let (store, _dir) = create_test_store();
        let original = store
            .insert_record(&new_file("aa01", "a.webm", "video/webm"), Utc::now())
            .unwrap();
        let derived = store
            .insert_record(
                &new_file("aa99", "a_transcoded_20240101000000.mp4", "video/mp4"),
                Utc::now(),
            )
            .unwrap();

        let found = store
            .find_sibling(&original, "a_transcoded_20240101000000.mp4")
            .unwrap()
            .unwrap();
        assert_eq!(found.id, derived.id);
        assert!(store.find_sibling(&original, "missing.mp4").unwrap().is_none());
    }

    #[test]
    fn test_discard_file_trashes_unshared_blob() {
        let (store, dir) = create_test_store();
        let staged = stage(dir.path(), "out.mp4", b"mp4");
        let file = store
            .insert_file(&new_file("abcd2222", "clip.mp4", "video/mp4"), &staged)
            .unwrap();

        let removed = store.discard_file(file.id).unwrap().unwrap();
        assert_eq!(removed.id, file.id);
        assert!(store.get_file(file.id).unwrap().is_none());
        assert!(!store.has_blob("abcd2222"));
        assert!(store.trash_dir().join("abcd2222").is_file());
    }

    #[test]
    fn test_discard_file_keeps_shared_blob() {
        let (store, dir) = create_test_store();
        let staged = stage(dir.path(), "out.mp4", b"mp4");
        let first = store
            .insert_file(&new_file("abcd3333", "one.mp4", "video/mp4"), &staged)
            .unwrap();
        store
            .insert_record(&new_file("abcd3333", "two.mp4", "video/mp4"), Utc::now())
            .unwrap();

        store.discard_file(first.id).unwrap();
        assert!(store.has_blob("abcd3333"));
    }

    #[test]
    fn test_discard_missing_file() {
        let (store, _dir) = create_test_store();
        assert!(store.discard_file(1234).unwrap().is_none());
        store.trash_blob("ffff0000").unwrap();
    }
}
