//! Snapshotting and diffing of directory trees
//!
//! [`Snapshotter`] walks a directory and produces a checksummed
//! [`Snapshot`](replid_core::Snapshot); [`diff::compare`] takes a local and
//! a remote snapshot of the same logical path and computes the entries the
//! local side is missing or has changed.

pub mod diff;
pub mod error;
pub mod snapshot;

pub use diff::compare;
pub use error::IndexError;
pub use snapshot::{checksum_bytes, checksum_file, Snapshotter};
