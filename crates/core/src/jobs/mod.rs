//! The discovery job, the worker and the reconciliation job.
//!
//! All three share a [`Services`] bundle and are safe to run from
//! independent processes against the same stores: the task store's claim
//! and fencing rules keep them from stepping on each other.

mod discovery;
mod documents;
mod reconciler;
mod services;
mod types;
mod worker;

pub use discovery::{DiscoveryJob, DISCOVERY_CHECKPOINT};
pub use reconciler::Reconciler;
pub use services::Services;
pub use types::{DiscoveryReport, JobError, ReconcileReport, WorkerError, WorkerOutcome};
pub use worker::Worker;
