//! Finds new media files and queues them for conversion.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use tracing::{debug, error, info, warn};

use crate::content::CandidateQuery;
use crate::task::{TaskError, TaskStatus};

use super::{DiscoveryReport, JobError, Services, Worker, WorkerOutcome};

/// Checkpoint holding the high-water mark of the last scan.
pub const DISCOVERY_CHECKPOINT: &str = "discovery.files_from";

/// Periodic scan of the content store for convertible files.
pub struct DiscoveryJob {
    services: Services,
}

impl DiscoveryJob {
    pub fn new(services: Services) -> Self {
        Self { services }
    }

    pub async fn run(&self) -> Result<DiscoveryReport, JobError> {
        self.run_at(Utc::now()).await
    }

    /// Run with `now` as the new high-water mark.
    ///
    /// The mark is advanced before the scan, so files modified while the
    /// scan runs are picked up next time. The scan itself starts a lookback
    /// window before the previous mark.
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<DiscoveryReport, JobError> {
        let config = &self.services.config;
        let tasks = &self.services.tasks;

        let previous = tasks
            .checkpoint(DISCOVERY_CHECKPOINT)?
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        let lookback = Duration::seconds(config.discovery.lookback_secs as i64);
        let modified_after = (previous - lookback).max(DateTime::<Utc>::UNIX_EPOCH);
        tasks.set_checkpoint(DISCOVERY_CHECKPOINT, now)?;

        let components: BTreeSet<String> = config
            .content_areas
            .iter()
            .map(|area| area.component.clone())
            .collect();
        let query = CandidateQuery {
            modified_after,
            components: components.into_iter().collect(),
            mimetypes: config.discovery.mimetypes.clone(),
        };

        info!(
            modified_after = %modified_after,
            "Looking for files to convert"
        );
        let candidates = self.services.content.find_candidates(&query)?;

        let mut report = DiscoveryReport {
            candidates: candidates.len(),
            ..Default::default()
        };
        let scanner = self.services.scanner();

        for file in candidates {
            if file.is_derived() {
                debug!(file_id = file.id, "{} is a derived file", file.filename);
                report.skipped += 1;
                continue;
            }
            if !tasks.find_by_source(file.id)?.is_empty() {
                debug!(file_id = file.id, "{} already has a task", file.filename);
                report.skipped += 1;
                continue;
            }

            // Unreferenced files are queued too; they may be plain attachments.
            match scanner.scan(&file) {
                Ok(references) if references.is_empty() => {
                    info!(
                        file_id = file.id,
                        "{} is not embedded in any document, queuing anyway", file.filename
                    );
                    report.unreferenced += 1;
                }
                Ok(references) => {
                    info!(
                        file_id = file.id,
                        documents = references.document_count(),
                        "Found {}",
                        file.filename
                    );
                }
                Err(e) => {
                    warn!(file_id = file.id, "Reference scan failed: {}", e);
                    report.errors += 1;
                }
            }

            match tasks.insert(file.id) {
                Ok(task) => {
                    debug!(task_id = task.id, file_id = file.id, "Queued");
                    report.enqueued += 1;
                }
                Err(TaskError::ActiveTaskExists(_)) => {
                    debug!(file_id = file.id, "Queued concurrently by another run");
                    report.skipped += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }

        if !config.worker.external_driver {
            self.dispatch(&mut report).await?;
        }

        info!(
            candidates = report.candidates,
            enqueued = report.enqueued,
            skipped = report.skipped,
            dispatched = report.dispatched,
            "Discovery finished"
        );
        Ok(report)
    }

    /// Run ready tasks up to the free worker slots.
    async fn dispatch(&self, report: &mut DiscoveryReport) -> Result<(), JobError> {
        let limit = self.services.config.worker.concurrency_limit;
        let in_progress = self.services.tasks.count_by_status(TaskStatus::InProgress)?;
        let slots = limit.saturating_sub(in_progress);
        if slots == 0 {
            info!(in_progress, limit, "No free worker slots");
            return Ok(());
        }

        let ready: Vec<_> = self
            .services
            .tasks
            .list_by_status(TaskStatus::Ready)?
            .into_iter()
            .take(slots)
            .collect();
        report.dispatched = ready.len();

        let worker = Worker::new(self.services.clone());
        let results = join_all(ready.iter().map(|task| worker.process_task(task.id))).await;

        for (task, result) in ready.iter().zip(results) {
            match result {
                Ok(WorkerOutcome::Completed { .. }) => report.completed += 1,
                Ok(WorkerOutcome::Failed { .. }) => report.failed += 1,
                Ok(_) => {}
                Err(e) if e.is_task_scoped() => {
                    warn!(task_id = task.id, "Task left in progress: {}", e);
                    report.errors += 1;
                }
                Err(e) => {
                    error!(task_id = task.id, "Worker error: {}", e);
                    report.errors += 1;
                }
            }
        }
        Ok(())
    }
}
