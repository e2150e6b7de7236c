//! Host documents: markup stored in configured table columns.

mod sqlite_store;
mod store;

pub use sqlite_store::SqliteDocumentStore;
pub use store::{Document, DocumentError, DocumentStore};
