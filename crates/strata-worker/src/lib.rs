//! Strata Worker Library
//!
//! Ingestion side of Strata: the job scheduler and its worker pool, chunked
//! resumable transfers from upstream sources, and the uploader that moves
//! staged media into object storage.

pub mod fetch;
pub mod pipeline;
pub mod scheduler;
pub mod transfer;
pub mod upload;

pub use fetch::{Fetcher, HttpFetcher};
pub use pipeline::{IngestPipeline, TaskPipeline, TaskReporter};
pub use scheduler::{Scheduler, SchedulerConfig};
pub use transfer::{ChunkedTransfer, TransferOutcome};
pub use upload::StorageUploader;
