//! Finds documents that reference a stored file by name.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::config::ContentArea;
use crate::content::StoredFile;
use crate::document::{Document, DocumentError, DocumentStore};

/// Documents referencing one file, grouped by content area and keyed by row id.
///
/// Areas without matches are never present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct References {
    areas: BTreeMap<ContentArea, BTreeMap<i64, Document>>,
}

impl References {
    /// Record the matches of one area. Empty match sets are dropped.
    pub fn insert(&mut self, area: ContentArea, documents: Vec<Document>) {
        if documents.is_empty() {
            return;
        }
        let entry = self.areas.entry(area).or_default();
        for document in documents {
            entry.insert(document.row_id, document);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.areas.is_empty()
    }

    /// Total number of matching documents across areas.
    pub fn document_count(&self) -> usize {
        self.areas.values().map(BTreeMap::len).sum()
    }

    /// Matches of one area, if any.
    pub fn get(&self, area: &ContentArea) -> Option<&BTreeMap<i64, Document>> {
        self.areas.get(area)
    }

    /// Areas with their matching documents, in area order.
    pub fn iter(&self) -> impl Iterator<Item = (&ContentArea, &BTreeMap<i64, Document>)> {
        self.areas.iter()
    }

    /// Documents referenced here whose row is not referenced in `other`.
    pub fn missing_from(&self, other: &References) -> References {
        let mut missing = References::default();
        for (area, documents) in &self.areas {
            let present = other.areas.get(area);
            let absent: Vec<Document> = documents
                .values()
                .filter(|doc| present.is_none_or(|rows| !rows.contains_key(&doc.row_id)))
                .cloned()
                .collect();
            missing.insert(area.clone(), absent);
        }
        missing
    }
}

/// Searches configured content areas for textual references to a file.
pub struct ReferenceScanner {
    areas: Vec<ContentArea>,
    documents: Arc<dyn DocumentStore>,
}

impl ReferenceScanner {
    pub fn new(areas: Vec<ContentArea>, documents: Arc<dyn DocumentStore>) -> Self {
        Self { areas, documents }
    }

    /// Find documents referencing `file` by name.
    ///
    /// Only areas matching the file's own component and storage area are
    /// searched; a copy of the file in another area has its own record.
    pub fn scan(&self, file: &StoredFile) -> Result<References, DocumentError> {
        let mut references = References::default();

        for area in self
            .areas
            .iter()
            .filter(|area| area.holds(&file.component, &file.file_area))
        {
            debug!(
                file_id = file.id,
                area = %area,
                "Looking for references to {}", file.filename
            );
            let matches = self.documents.find_containing(area, &file.filename)?;
            references.insert(area.clone(), matches);
        }

        Ok(references)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::SqliteDocumentStore;
    use chrono::Utc;
    use rusqlite::Connection;

    fn page_area() -> ContentArea {
        ContentArea::new("mod_page", "content", "page", "content")
    }

    fn label_area() -> ContentArea {
        ContentArea::new("mod_label", "intro", "label", "intro")
    }

    fn create_scanner() -> ReferenceScanner {
        let store = SqliteDocumentStore::from_connection(Connection::open_in_memory().unwrap())
            .unwrap();
        store
            .execute_batch(
                r#"
                CREATE TABLE page (id INTEGER PRIMARY KEY, content TEXT);
                CREATE TABLE label (id INTEGER PRIMARY KEY, intro TEXT);
                INSERT INTO page (id, content) VALUES
                    (1, '<video><source src="@@PLUGINFILE@@/talk.webm"></video>'),
                    (2, '<p>nothing here</p>'),
                    (3, '<a href="@@PLUGINFILE@@/talk.webm">download</a>');
                INSERT INTO label (id, intro) VALUES
                    (1, '<video><source src="@@PLUGINFILE@@/talk.webm"></video>');
                "#,
            )
            .unwrap();
        ReferenceScanner::new(vec![page_area(), label_area()], Arc::new(store))
    }

    fn file(component: &str, file_area: &str, filename: &str) -> StoredFile {
        StoredFile {
            id: 1,
            content_hash: "aabbccdd".to_string(),
            context_id: 1,
            component: component.to_string(),
            file_area: file_area.to_string(),
            item_id: 0,
            file_path: "/".to_string(),
            filename: filename.to_string(),
            mimetype: Some("video/webm".to_string()),
            size: 1,
            time_created: Utc::now(),
            time_modified: Utc::now(),
        }
    }

    #[test]
    fn test_scan_only_searches_own_area() {
        let scanner = create_scanner();
        let refs = scanner
            .scan(&file("mod_page", "content", "talk.webm"))
            .unwrap();

        assert_eq!(refs.document_count(), 2);
        let rows: Vec<i64> = refs.get(&page_area()).unwrap().keys().copied().collect();
        assert_eq!(rows, vec![1, 3]);
        assert!(refs.get(&label_area()).is_none());
    }

    #[test]
    fn test_scan_without_matches_is_empty() {
        let scanner = create_scanner();
        let refs = scanner
            .scan(&file("mod_page", "content", "other.webm"))
            .unwrap();
        assert!(refs.is_empty());

        let unconfigured = scanner
            .scan(&file("mod_forum", "post", "talk.webm"))
            .unwrap();
        assert!(unconfigured.is_empty());
    }

    #[test]
    fn test_missing_from() {
        let doc = |row_id| Document {
            row_id,
            content: String::new(),
            scope_id: None,
        };
        let mut original = References::default();
        original.insert(page_area(), vec![doc(1), doc(2)]);
        original.insert(label_area(), vec![doc(5)]);

        let mut derived = References::default();
        derived.insert(page_area(), vec![doc(1)]);

        let missing = original.missing_from(&derived);
        let page_rows: Vec<i64> = missing.get(&page_area()).unwrap().keys().copied().collect();
        assert_eq!(page_rows, vec![2]);
        assert!(missing.get(&label_area()).is_some());
        assert!(original.missing_from(&original).is_empty());
    }
}
