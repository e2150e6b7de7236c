//! Periodic repair of the queue and of published references.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::task::{Task, TaskStatus};

use super::documents::DocumentUpdater;
use super::{JobError, ReconcileReport, Services};

/// Recycles abandoned tasks and keeps completed ones consistent with the
/// documents that reference them.
pub struct Reconciler {
    services: Services,
}

impl Reconciler {
    pub fn new(services: Services) -> Self {
        Self { services }
    }

    pub async fn run(&self) -> Result<ReconcileReport, JobError> {
        self.run_at(Utc::now()).await
    }

    /// Run with `now` as the reference time for staleness and recheck windows.
    ///
    /// Task store failures abort the run; anything else is logged per task.
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<ReconcileReport, JobError> {
        let settings = &self.services.config.reconciliation;
        let mut report = ReconcileReport::default();

        let stale_before = now - Duration::minutes(settings.staleness_mins as i64);
        let recycled = self
            .services
            .tasks
            .recycle_expired(stale_before, settings.max_retries)?;
        if recycled.total() > 0 {
            info!(
                requeued = recycled.requeued,
                failed = recycled.failed,
                "Recycled abandoned tasks"
            );
        }
        report.requeued = recycled.requeued;
        report.failed = recycled.failed;

        let recheck_after = (settings.recheck_mins > 0)
            .then(|| now - Duration::minutes(settings.recheck_mins as i64));

        for task in self.services.tasks.list_by_status(TaskStatus::Completed)? {
            if let Err(e) = self.reconcile_task(&task, recheck_after, &mut report) {
                if let JobError::Tasks(_) = e {
                    return Err(e);
                }
                warn!(task_id = task.id, "Reconciliation failed: {}", e);
                report.errors += 1;
            }
        }

        info!(
            requeued = report.requeued,
            failed = report.failed,
            checked = report.checked,
            documents_repaired = report.documents_repaired,
            removed = report.orphans_removed + report.missing_originals_removed,
            "Reconciliation finished"
        );
        Ok(report)
    }

    fn reconcile_task(
        &self,
        task: &Task,
        recheck_after: Option<DateTime<Utc>>,
        report: &mut ReconcileReport,
    ) -> Result<(), JobError> {
        let content = &self.services.content;

        let Some(original) = content.get_file(task.source_file_id)? else {
            info!(
                task_id = task.id,
                source_file_id = task.source_file_id,
                "Original file is gone, removing task and derived file"
            );
            self.remove_task(task, report)?;
            report.missing_originals_removed += 1;
            return Ok(());
        };

        let recent = match (recheck_after, task.finished_at) {
            (Some(after), Some(finished)) => finished >= after,
            _ => false,
        };
        if !recent {
            return Ok(());
        }

        let Some(derived_id) = task.derived_file_id else {
            debug!(task_id = task.id, "Completed task has no derived file");
            return Ok(());
        };
        let Some(derived) = content.get_file(derived_id)? else {
            debug!(task_id = task.id, "Derived file was removed, nothing to check");
            return Ok(());
        };
        report.checked += 1;

        let scanner = self.services.scanner();
        let original_refs = scanner.scan(&original)?;
        let derived_refs = scanner.scan(&derived)?;

        if original_refs.is_empty() && derived_refs.is_empty() {
            info!(
                task_id = task.id,
                "Neither {} nor {} is referenced, removing", original.filename, derived.filename
            );
            self.remove_task(task, report)?;
            report.orphans_removed += 1;
            return Ok(());
        }

        let missing = original_refs.missing_from(&derived_refs);
        if missing.is_empty() {
            return Ok(());
        }
        let Some(kind) = original.media_kind() else {
            debug!(task_id = task.id, "Original is not a media file any more");
            return Ok(());
        };

        info!(
            task_id = task.id,
            documents = missing.document_count(),
            "Re-adding {} where it went missing", derived.filename
        );
        report.documents_repaired +=
            DocumentUpdater::new(&self.services).add_derived(&original, &derived, kind, &missing)?;
        Ok(())
    }

    /// Delete a task with its derived file, dropping the file from documents first.
    fn remove_task(&self, task: &Task, report: &mut ReconcileReport) -> Result<(), JobError> {
        if let Some(derived_id) = task.derived_file_id {
            if let Some(derived) = self.services.content.get_file(derived_id)? {
                let references = self.services.scanner().scan(&derived)?;
                report.references_removed +=
                    DocumentUpdater::new(&self.services).remove_derived(&derived, &references)?;
                self.services.content.discard_file(derived.id)?;
            }
        }
        self.services.tasks.delete(task.id)?;
        Ok(())
    }
}
