//! Document store trait and errors.

use serde::Serialize;
use thiserror::Error;

use crate::config::ContentArea;

/// Error type for document operations.
#[derive(Debug, Error)]
pub enum DocumentError {
    /// Row not found in the area's table.
    #[error("row {row_id} not found in {table}")]
    NotFound { table: String, row_id: i64 },

    /// Database error.
    #[error("database error: {0}")]
    Database(String),
}

impl From<rusqlite::Error> for DocumentError {
    fn from(e: rusqlite::Error) -> Self {
        DocumentError::Database(e.to_string())
    }
}

/// One row of a content area: its markup and cache scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Document {
    pub row_id: i64,
    /// Markup of the area's column.
    pub content: String,
    /// Cache scope of the row (e.g. its course), when the area defines one.
    pub scope_id: Option<i64>,
}

/// Read and write access to documents of configured content areas.
pub trait DocumentStore: Send + Sync {
    /// Rows of `area` whose markup contains `needle`, ordered by row id.
    fn find_containing(
        &self,
        area: &ContentArea,
        needle: &str,
    ) -> Result<Vec<Document>, DocumentError>;

    /// Replace the markup of a row.
    fn update_content(
        &self,
        area: &ContentArea,
        row_id: i64,
        content: &str,
    ) -> Result<(), DocumentError>;

    /// Best-effort link to a row, for operator logs.
    fn document_url(&self, area: &ContentArea, row_id: i64) -> Option<String> {
        area.url_template
            .as_ref()
            .map(|template| template.replace("{id}", &row_id.to_string()))
    }

    /// Ask the host to rebuild cached renders of a scope.
    fn invalidate_cache(&self, scope_id: i64) -> Result<(), DocumentError>;
}
