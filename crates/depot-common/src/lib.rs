//! Depot Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared error handling, logging bootstrap, and checksum utilities for the
//! Depot workspace.
//!
//! # Overview
//!
//! - **Error Handling**: the workspace-wide [`DepotError`] and `Result` alias
//! - **Logging**: `tracing` subscriber configuration and initialization
//! - **Checksums**: MD5/CRC32 content fingerprinting

pub mod checksum;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{DepotError, Result};
