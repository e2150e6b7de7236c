pub mod config;
pub mod content;
pub mod converter;
pub mod document;
pub mod jobs;
pub mod media;
pub mod rewriter;
pub mod scanner;
pub mod task;
pub mod testing;

pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, ConfigSummary,
    ContentArea,
};
pub use content::{ContentError, ContentStore, SqliteContentStore, StoredFile};
pub use converter::{Converter, ConverterError, FfmpegConverter};
pub use document::{DocumentError, DocumentStore, SqliteDocumentStore};
pub use jobs::{
    DiscoveryJob, DiscoveryReport, JobError, ReconcileReport, Reconciler, Services, Worker,
    WorkerError, WorkerOutcome,
};
pub use media::MediaKind;
pub use rewriter::{DocumentRewriter, HtmlMarkup, MediaMarkup, Rewrite};
pub use scanner::{ReferenceScanner, References};
pub use task::{SqliteTaskStore, Task, TaskError, TaskId, TaskStatus, TaskStore};
