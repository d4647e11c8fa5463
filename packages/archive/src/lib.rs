#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Streaming traversal of zipped dataset archives.
//!
//! [`ArchiveEntryStream`] spools a zip archive from an async byte source to
//! an anonymous temporary file and walks it one entry at a time, so peak
//! memory is bounded by the largest entry rather than the archive. [`classify_entry`] maps each entry
//! path to the [`GeometryKind`](dataset_loader_load_models::GeometryKind)
//! whose table it feeds.

pub mod classify;
pub mod stream;

pub use classify::{DATA_FILE_SUFFIX, classify_entry, is_data_file};
pub use stream::{ArchiveEntry, ArchiveEntryStream};

/// Errors that can occur while reading an archive.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// The zip structure is invalid, truncated, or uses an unsupported
    /// feature.
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Copying the archive bytes to local scratch space failed.
    #[error("Failed to spool archive: {0}")]
    Spool(#[source] std::io::Error),

    /// Reading decompressed entry bytes failed.
    #[error("I/O error reading {path}: {source}")]
    Io {
        /// Entry being read.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The background reader went away before the entry could be read.
    #[error("Archive reader stopped before {path} could be read")]
    ReaderClosed {
        /// Entry that was requested.
        path: String,
    },
}
