//! Shared handles the jobs operate on.

use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::content::{ContentStore, SqliteContentStore};
use crate::converter::{Converter, ConverterConfig, FfmpegConverter};
use crate::document::{DocumentStore, SqliteDocumentStore};
use crate::rewriter::{DocumentRewriter, HtmlMarkup, MediaMarkup};
use crate::scanner::ReferenceScanner;
use crate::task::{SqliteTaskStore, TaskStore};

use super::JobError;

/// Stores, converter and markup engine shared by every job.
#[derive(Clone)]
pub struct Services {
    pub config: Arc<Config>,
    pub tasks: Arc<dyn TaskStore>,
    pub content: Arc<dyn ContentStore>,
    pub documents: Arc<dyn DocumentStore>,
    pub converter: Arc<dyn Converter>,
    pub markup: Arc<dyn MediaMarkup>,
}

impl Services {
    /// Open the SQLite stores and the FFmpeg converter named by `config`.
    pub fn open(config: Config) -> Result<Self, JobError> {
        let tasks = SqliteTaskStore::new(&config.database.path)?;
        let content = SqliteContentStore::new(&config.host.database, &config.host.data_root)?;
        let documents = SqliteDocumentStore::new(&config.host.database)?;
        let converter = FfmpegConverter::new(ConverterConfig::from(&config.engine));

        info!(
            "Opened task database {} and host database {}",
            config.database.path.display(),
            config.host.database.display()
        );

        Ok(Self {
            config: Arc::new(config),
            tasks: Arc::new(tasks),
            content: Arc::new(content),
            documents: Arc::new(documents),
            converter: Arc::new(converter),
            markup: Arc::new(HtmlMarkup::new()),
        })
    }

    /// Scanner over the configured content areas.
    pub fn scanner(&self) -> ReferenceScanner {
        ReferenceScanner::new(self.config.content_areas.clone(), Arc::clone(&self.documents))
    }

    /// Rewriter using the configured source prefix.
    pub fn rewriter(&self) -> DocumentRewriter {
        DocumentRewriter::new(
            Arc::clone(&self.markup),
            self.config.rewriter.source_prefix.clone(),
        )
    }
}
