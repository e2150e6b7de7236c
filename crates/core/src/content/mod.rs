//! Host content store: file records and their blobs.

mod sqlite_store;
mod store;
mod types;

pub use sqlite_store::SqliteContentStore;
pub use store::{ContentError, ContentStore};
pub use types::{
    derived_content_hash, derived_filename, hex_digest, CandidateQuery, FileId, NewFile,
    StoredFile, DERIVED_NAME_MARKER, LOCALITY_PREFIX_LEN,
};
