//! Depot Ingest
//!
//! The bulk-load machinery: copy or link externally-stored files into
//! managed storage and commit them to the catalog, surviving process
//! restarts, partial failures, and concurrent retries of the same
//! logical load.
//!
//! # Overview
//!
//! - [`storage`]: the [`ObjectStore`](storage::ObjectStore) seam with S3
//!   and in-memory backends, errors split transient/permanent
//! - [`load`]: bulk-load bookkeeping: one row per file, monotonic state
//!   transitions, load-tag locking
//! - [`copier`]: the bounded parallel copy/link engine with
//!   one-batch-in-flight backpressure and a failure threshold
//! - [`flights`]: the per-file and bulk flight definitions, the ingest
//!   driver (scheduler) step, and [`BulkLoadService`], the front door
//! - [`config`]: the recognized tunables
//!
//! # Example
//!
//! ```rust,ignore
//! let service = BulkLoadService::new(IngestContext {
//!     load_store,
//!     object_store,
//!     catalog,
//!     runner,
//!     config: IngestConfig::load()?,
//! });
//!
//! let outcome = service
//!     .run(BulkLoadInput {
//!         collection_id,
//!         load_tag: "weekly-drop-2026-08".to_string(),
//!         source: BulkLoadSource::Array { files },
//!         mode: BulkLoadMode::Driver,
//!         id_allocation: IdAllocation::Random,
//!         self_hosted: false,
//!         max_failed_file_loads: 0,
//!     })
//!     .await?;
//! ```

pub mod config;
pub mod copier;
pub mod flights;
pub mod load;
pub mod storage;

pub use config::IngestConfig;
pub use copier::{BulkCopier, BulkCopyOutcome, IdAllocation};
pub use flights::{
    bulk_load_flight, file_load_flight, BulkLoadFailure, BulkLoadInput, BulkLoadMode,
    BulkLoadOutcome, BulkLoadService, BulkLoadSource, BulkLoadState, FileLoadInput,
    FileLoadState, IngestContext, IngestDriverStep,
};
pub use load::{
    BulkFileResult, BulkLoadResult, LoadError, LoadFile, LoadFileSpec, LoadFileState,
    LoadStore, MemoryLoadStore, PgLoadStore,
};
pub use storage::{
    FileInfo, MemoryObjectStore, ObjectStore, S3ObjectStore, StorageConfig, StorageError,
};
