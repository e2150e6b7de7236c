//! Converts one claimed task and publishes the result.

use std::path::{Path, PathBuf};

use chrono::{Duration, Utc};
use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, BufReader};
use tracing::{debug, error, info, warn};

use crate::content::{derived_content_hash, NewFile, StoredFile};
use crate::converter::{ConversionJob, EncodeOptions};
use crate::media::MediaKind;
use crate::task::{Task, TaskId, TaskStatus};

use super::documents::DocumentUpdater;
use super::{Services, WorkerError, WorkerOutcome};

const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// Runs tasks through conversion, storage and document rewriting.
///
/// A task is only ever completed or failed by the attempt that claimed it.
/// When processing stops half-way the task stays in progress and the
/// reconciliation job recycles it once it is stale.
#[derive(Clone)]
pub struct Worker {
    services: Services,
}

impl Worker {
    pub fn new(services: Services) -> Self {
        Self { services }
    }

    /// Claim and process the oldest ready task, if the ceiling allows it.
    pub async fn process_next(&self) -> Result<WorkerOutcome, WorkerError> {
        let limit = self.services.config.worker.concurrency_limit;
        let in_progress = self.services.tasks.count_by_status(TaskStatus::InProgress)?;
        if in_progress >= limit {
            info!(in_progress, limit, "Too many tasks in progress, not claiming");
            return Ok(WorkerOutcome::Saturated { in_progress, limit });
        }

        match self.services.tasks.claim_next()? {
            Some(task) => self.run_claimed(task).await,
            None => {
                debug!("No ready task");
                Ok(WorkerOutcome::Idle)
            }
        }
    }

    /// Claim and process a specific task.
    ///
    /// A task that is not ready any more is skipped without side effects.
    pub async fn process_task(&self, id: TaskId) -> Result<WorkerOutcome, WorkerError> {
        match self.services.tasks.claim(id)? {
            Some(task) => self.run_claimed(task).await,
            None => {
                let status = self.services.tasks.get(id)?.map(|task| task.status);
                debug!(task_id = id, ?status, "Task is not ready, skipping");
                Ok(WorkerOutcome::Skipped { task_id: id, status })
            }
        }
    }

    async fn run_claimed(&self, task: Task) -> Result<WorkerOutcome, WorkerError> {
        let attempt = task
            .attempt
            .clone()
            .ok_or(WorkerError::MissingAttempt(task.id))?;

        info!(
            task_id = task.id,
            source_file_id = task.source_file_id,
            retry = task.retry_count,
            "Processing task"
        );

        let Some(original) = self.services.content.get_file(task.source_file_id)? else {
            return self.fail(&task, &attempt, "source file record is gone");
        };
        let Some(kind) = original.media_kind() else {
            let reason = format!(
                "unsupported media type {}",
                original.mimetype.as_deref().unwrap_or("(none)")
            );
            return self.fail(&task, &attempt, &reason);
        };
        if !self.services.content.has_blob(&original.content_hash) {
            let reason = format!("blob {} is missing", original.content_hash);
            return self.fail(&task, &attempt, &reason);
        }

        let staged = self.convert(&task, &attempt, &original, kind).await?;
        if let Err(e) = self.services.tasks.owns(task.id, &attempt) {
            warn!(task_id = task.id, "Lost the task during conversion: {}", e);
            remove_staged(&staged).await;
            return Err(e.into());
        }

        let derived = self.store_output(&original, kind, &staged).await?;
        info!(
            task_id = task.id,
            derived_file_id = derived.id,
            "Stored {} as {}", original.filename, derived.filename
        );

        match self.publish(&task, &attempt, &original, &derived, kind) {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                warn!(
                    task_id = task.id,
                    derived_file_id = derived.id,
                    "Discarding {} after failed publish: {}", derived.filename, e
                );
                if let Err(discard_err) = self.services.content.discard_file(derived.id) {
                    error!(
                        derived_file_id = derived.id,
                        "Failed to discard {}: {}", derived.filename, discard_err
                    );
                }
                Err(e)
            }
        }
    }

    /// Reference the stored output in documents and complete the task.
    ///
    /// Every write is preceded by an ownership check on `attempt`.
    fn publish(
        &self,
        task: &Task,
        attempt: &str,
        original: &StoredFile,
        derived: &StoredFile,
        kind: MediaKind,
    ) -> Result<WorkerOutcome, WorkerError> {
        let references = self.services.scanner().scan(original)?;
        if references.is_empty() {
            info!(
                task_id = task.id,
                "{} is not embedded in any document", original.filename
            );
        }
        let documents_updated = DocumentUpdater::new(&self.services)
            .with_owner(task.id, attempt)
            .add_derived(original, derived, kind, &references)?;

        let completed = self
            .services
            .tasks
            .mark_completed(task.id, attempt, derived.id)?;
        info!(
            task_id = task.id,
            documents_updated,
            elapsed_secs = completed.elapsed_secs(),
            "Task completed"
        );

        Ok(WorkerOutcome::Completed {
            task_id: task.id,
            derived_file_id: derived.id,
            documents_updated,
        })
    }

    fn fail(&self, task: &Task, attempt: &str, reason: &str) -> Result<WorkerOutcome, WorkerError> {
        warn!(task_id = task.id, "Giving up on task: {}", reason);
        self.services.tasks.mark_failed(task.id, attempt)?;
        Ok(WorkerOutcome::Failed {
            task_id: task.id,
            reason: reason.to_string(),
        })
    }

    /// Convert the original's blob into the staging directory.
    async fn convert(
        &self,
        task: &Task,
        attempt: &str,
        original: &StoredFile,
        kind: MediaKind,
    ) -> Result<PathBuf, WorkerError> {
        let output_path = self.services.content.staging_dir().join(format!(
            "{}_transcoding_{}.{}",
            original.content_hash,
            attempt,
            kind.output_extension()
        ));
        let job = ConversionJob {
            job_id: format!("task-{}", task.id),
            input_path: self.services.content.blob_path(&original.content_hash),
            output_path: output_path.clone(),
            kind,
            options: EncodeOptions::from(&self.services.config.engine),
        };

        match self.services.converter.convert(job).await {
            Ok(result) => {
                debug!(
                    task_id = task.id,
                    duration_ms = result.duration_ms,
                    size = result.output_size_bytes,
                    "Conversion finished"
                );
                Ok(result.output_path)
            }
            Err(e) => {
                error!(task_id = task.id, "Conversion failed: {}", e);
                remove_staged(&output_path).await;
                Err(WorkerError::Conversion {
                    task_id: task.id,
                    source: e,
                })
            }
        }
    }

    /// Hash the staged output and move it into the content store.
    async fn store_output(
        &self,
        original: &StoredFile,
        kind: MediaKind,
        staged: &Path,
    ) -> Result<StoredFile, WorkerError> {
        let (digest, size) = digest_file(staged).await?;
        let content_hash = derived_content_hash(&original.content_hash, &digest);

        // Names carry a one-second stamp; step past names already taken.
        let mut stamp = Utc::now();
        let mut record = NewFile::derived_from(original, kind, content_hash.clone(), size, stamp);
        while self
            .services
            .content
            .find_sibling(original, &record.filename)?
            .is_some()
        {
            stamp += Duration::seconds(1);
            record = NewFile::derived_from(original, kind, content_hash.clone(), size, stamp);
        }

        Ok(self.services.content.insert_file(&record, staged)?)
    }
}

async fn remove_staged(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove staged output {}: {}", path.display(), e);
        }
    }
}

/// Streaming SHA-256 of a file, with its size.
async fn digest_file(path: &Path) -> Result<(String, u64), WorkerError> {
    let io_error = |source| WorkerError::Io {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).await.map_err(io_error)?;
    let mut reader = BufReader::with_capacity(HASH_BUFFER_SIZE, file);
    let mut buffer = vec![0u8; HASH_BUFFER_SIZE];
    let mut hasher = Sha256::new();
    let mut size = 0u64;

    loop {
        let bytes_read = reader.read(&mut buffer).await.map_err(io_error)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
        size += bytes_read as u64;
    }

    Ok((format!("{:x}", hasher.finalize()), size))
}
