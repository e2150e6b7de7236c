//! Content store trait and errors.

use std::path::{Path, PathBuf};

use thiserror::Error;

use super::{CandidateQuery, FileId, NewFile, StoredFile};

/// Error type for content store operations.
#[derive(Debug, Error)]
pub enum ContentError {
    /// File record not found.
    #[error("file record not found: {0}")]
    NotFound(FileId),

    /// Blob missing on disk.
    #[error("blob {content_hash} missing at {path}")]
    BlobMissing { content_hash: String, path: PathBuf },

    /// Filesystem error.
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Database error.
    #[error("database error: {0}")]
    Database(String),
}

impl ContentError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<rusqlite::Error> for ContentError {
    fn from(e: rusqlite::Error) -> Self {
        ContentError::Database(e.to_string())
    }
}

/// Access to file records and their content-addressed blobs.
pub trait ContentStore: Send + Sync {
    /// Get a file record by ID.
    fn get_file(&self, id: FileId) -> Result<Option<StoredFile>, ContentError>;

    /// Find a file by name inside the area of `near` (same context, component and area).
    fn find_sibling(
        &self,
        near: &StoredFile,
        filename: &str,
    ) -> Result<Option<StoredFile>, ContentError>;

    /// Files matching a discovery query, ordered by id.
    fn find_candidates(&self, query: &CandidateQuery) -> Result<Vec<StoredFile>, ContentError>;

    /// Physical location of the blob with the given hash.
    fn blob_path(&self, content_hash: &str) -> PathBuf;

    /// Whether the blob exists on disk.
    fn has_blob(&self, content_hash: &str) -> bool {
        self.blob_path(content_hash).is_file()
    }

    /// Directory where converters write output before it is stored.
    fn staging_dir(&self) -> PathBuf;

    /// Move `staged` into the blob store and insert its record.
    fn insert_file(&self, file: &NewFile, staged: &Path) -> Result<StoredFile, ContentError>;

    /// Delete a file record. Returns the deleted record, if there was one.
    ///
    /// The blob is left alone; see [`ContentStore::trash_blob`].
    fn delete_file(&self, id: FileId) -> Result<Option<StoredFile>, ContentError>;

    /// Whether any record still points at the blob.
    fn hash_in_use(&self, content_hash: &str) -> Result<bool, ContentError>;

    /// Move a blob into the trash directory. Missing blobs are ignored.
    fn trash_blob(&self, content_hash: &str) -> Result<(), ContentError>;

    /// Delete a record and trash its blob unless another record shares it.
    fn discard_file(&self, id: FileId) -> Result<Option<StoredFile>, ContentError> {
        let Some(file) = self.delete_file(id)? else {
            return Ok(None);
        };
        if !self.hash_in_use(&file.content_hash)? {
            self.trash_blob(&file.content_hash)?;
        }
        Ok(Some(file))
    }
}
