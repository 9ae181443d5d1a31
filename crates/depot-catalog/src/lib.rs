//! Depot Catalog
//!
//! The hierarchical metadata namespace: a "filesystem" of directory
//! entries and file metadata records layered over a document store.
//!
//! # Overview
//!
//! - [`DirectoryEntry`] / [`FileMetadata`]: the two record kinds a file is
//!   split across; both present is the sole visibility signal
//! - [`MetadataStore`]: batched document primitives with
//!   insert-if-absent conflict reporting ([`MemoryMetadataStore`],
//!   [`PgMetadataStore`])
//! - [`Catalog`]: the coordinator implementing load-tag-aware idempotent
//!   upserts, ancestor creation and pruning, and visibility-aware lookups
//! - [`paths`]: path splitting, ancestor derivation, and document-name
//!   encoding

pub mod catalog;
pub mod entry;
pub mod error;
pub mod memory;
pub mod paths;
pub mod postgres;
pub mod store;

pub use catalog::{Catalog, ConflictMap, ENUMERATE_ALL};
pub use entry::{DirectoryEntry, FileMetadata, FsDir, FsFile, FsItem};
pub use error::{CatalogError, Result};
pub use memory::MemoryMetadataStore;
pub use postgres::PgMetadataStore;
pub use store::{MetadataStore, UpsertOutcome, MAX_BATCH_SIZE};
