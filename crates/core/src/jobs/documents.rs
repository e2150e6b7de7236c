//! Applies rewrites to scanned documents and persists the changed ones.

use std::collections::BTreeSet;

use tracing::{debug, info, warn};

use crate::config::ContentArea;
use crate::content::StoredFile;
use crate::document::Document;
use crate::media::MediaKind;
use crate::rewriter::{DocumentRewriter, Rewrite};
use crate::scanner::References;
use crate::task::TaskId;

use super::{JobError, Services};

/// Writes rewritten markup back and asks the host to rebuild caches.
pub(crate) struct DocumentUpdater<'a> {
    services: &'a Services,
    rewriter: DocumentRewriter,
    owner: Option<(TaskId, &'a str)>,
}

impl<'a> DocumentUpdater<'a> {
    pub(crate) fn new(services: &'a Services) -> Self {
        Self {
            services,
            rewriter: services.rewriter(),
            owner: None,
        }
    }

    /// Only write while `attempt` still owns task `id`.
    pub(crate) fn with_owner(mut self, id: TaskId, attempt: &'a str) -> Self {
        self.owner = Some((id, attempt));
        self
    }

    fn check_owner(&self) -> Result<(), JobError> {
        if let Some((id, attempt)) = self.owner {
            self.services.tasks.owns(id, attempt)?;
        }
        Ok(())
    }

    /// Reference `derived` next to `original` in every scanned document.
    ///
    /// Stale derived siblings dropped from the markup are discarded from the
    /// content store. Returns the number of documents written.
    pub(crate) fn add_derived(
        &self,
        original: &StoredFile,
        derived: &StoredFile,
        kind: MediaKind,
        references: &References,
    ) -> Result<usize, JobError> {
        let mut written = 0;
        let mut scopes = BTreeSet::new();
        let mut stale = BTreeSet::new();

        for (area, documents) in references.iter() {
            for document in documents.values() {
                let rewrite = self.rewriter.rewrite(
                    &document.content,
                    &original.filename,
                    &derived.filename,
                    kind,
                );
                stale.extend(rewrite.removed.iter().cloned());
                if self.persist(area, document, &rewrite, &mut scopes)? {
                    written += 1;
                }
            }
        }

        self.invalidate(&scopes)?;

        for name in stale {
            if name == derived.filename {
                continue;
            }
            self.check_owner()?;
            if let Some(sibling) = self.services.content.find_sibling(original, &name)? {
                info!(
                    file_id = sibling.id,
                    "Discarding superseded derived file {}", sibling.filename
                );
                self.services.content.discard_file(sibling.id)?;
            }
        }

        Ok(written)
    }

    /// Remove sources pointing at `derived` from every scanned document.
    pub(crate) fn remove_derived(
        &self,
        derived: &StoredFile,
        references: &References,
    ) -> Result<usize, JobError> {
        let Some(kind) = derived.media_kind() else {
            warn!(
                file_id = derived.id,
                "Derived file {} has no media type, leaving documents alone", derived.filename
            );
            return Ok(0);
        };

        let mut written = 0;
        let mut scopes = BTreeSet::new();
        for (area, documents) in references.iter() {
            for document in documents.values() {
                let rewrite =
                    self.rewriter
                        .remove_reference(&document.content, &derived.filename, kind);
                if self.persist(area, document, &rewrite, &mut scopes)? {
                    written += 1;
                }
            }
        }

        self.invalidate(&scopes)?;
        Ok(written)
    }

    fn persist(
        &self,
        area: &ContentArea,
        document: &Document,
        rewrite: &Rewrite,
        scopes: &mut BTreeSet<i64>,
    ) -> Result<bool, JobError> {
        if !rewrite.changed {
            debug!(area = %area, row_id = document.row_id, "Document already up to date");
            return Ok(false);
        }

        self.check_owner()?;
        self.services
            .documents
            .update_content(area, document.row_id, &rewrite.content)?;

        match self.services.documents.document_url(area, document.row_id) {
            Some(url) => info!(area = %area, row_id = document.row_id, "Updated {}", url),
            None => info!(area = %area, row_id = document.row_id, "Updated document"),
        }

        if let Some(scope) = document.scope_id {
            scopes.insert(scope);
        }
        Ok(true)
    }

    fn invalidate(&self, scopes: &BTreeSet<i64>) -> Result<(), JobError> {
        for scope in scopes {
            debug!(scope_id = scope, "Invalidating render cache");
            self.services.documents.invalidate_cache(*scope)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::NewFile;
    use crate::task::{TaskError, TaskStore};
    use crate::testing::fixtures::{video_markup, TestHarness};
    use chrono::Utc;
    use tempfile::TempDir;

    fn stored_derived(harness: &TestHarness, original: &StoredFile) -> StoredFile {
        let record = NewFile::derived_from(
            original,
            MediaKind::Video,
            original.content_hash.clone(),
            original.size,
            Utc::now(),
        );
        harness.content.insert_record(&record, Utc::now()).unwrap()
    }

    #[test]
    fn test_stale_owner_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let harness = TestHarness::new(dir.path());
        let original = harness.add_file("talk.webm", "video/webm", b"talk");
        let page = harness.add_page(7, &video_markup("talk.webm"));
        let derived = stored_derived(&harness, &original);

        let task = harness.tasks.insert(original.id).unwrap();
        let claimed = harness.tasks.claim(task.id).unwrap().unwrap();
        let attempt = claimed.attempt.clone().unwrap();
        harness
            .tasks
            .recycle_expired(Utc::now() + chrono::Duration::seconds(1), 2)
            .unwrap();

        let references = harness.services.scanner().scan(&original).unwrap();
        let result = DocumentUpdater::new(&harness.services)
            .with_owner(task.id, &attempt)
            .add_derived(&original, &derived, MediaKind::Video, &references);

        assert!(matches!(
            result,
            Err(JobError::Tasks(TaskError::StaleAttempt { .. }))
        ));
        assert_eq!(harness.page_content(page), video_markup("talk.webm"));
        assert!(harness.documents.pending_invalidations().unwrap().is_empty());
    }

    #[test]
    fn test_current_owner_updates_documents() {
        let dir = TempDir::new().unwrap();
        let harness = TestHarness::new(dir.path());
        let original = harness.add_file("talk.webm", "video/webm", b"talk");
        let page = harness.add_page(7, &video_markup("talk.webm"));
        let derived = stored_derived(&harness, &original);

        let task = harness.tasks.insert(original.id).unwrap();
        let claimed = harness.tasks.claim(task.id).unwrap().unwrap();
        let attempt = claimed.attempt.clone().unwrap();

        let references = harness.services.scanner().scan(&original).unwrap();
        let written = DocumentUpdater::new(&harness.services)
            .with_owner(task.id, &attempt)
            .add_derived(&original, &derived, MediaKind::Video, &references)
            .unwrap();

        assert_eq!(written, 1);
        assert!(harness.page_content(page).contains(&derived.filename));
    }
}
