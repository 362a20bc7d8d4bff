//! Snapshot entries
//!
//! A snapshot is a checksummed picture of a directory tree at one point in
//! time: a mapping from path to [`Entry`], where directory entries own a
//! nested mapping of their direct children. Snapshots are immutable once
//! built; a fresh walk always produces a fresh tree.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The root of a snapshot: direct children of the walked path, keyed by
/// their full path relative to the serving root.
///
/// `BTreeMap` keeps iteration (and therefore diff output) in a stable,
/// path-sorted order.
pub type Snapshot = BTreeMap<String, Entry>;

/// One node of a snapshot tree - a file, directory, or symlink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Full slash-separated path relative to the serving root.
    pub path: String,
    /// Size in bytes (directory sizes are whatever the filesystem reports).
    pub size: u64,
    /// Last modification time.
    pub modified_at: DateTime<Utc>,
    /// Unix permission bits (the low nine bits of the file mode).
    pub mode: u32,
    /// Whether this entry is a directory.
    pub is_dir: bool,
    /// Hex-encoded content checksum. `Some` iff this is a file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    /// Direct children keyed by path. `Some` iff this is a directory with
    /// at least one child.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children: Option<BTreeMap<String, Entry>>,
}

impl Entry {
    /// Creates a file entry with its content checksum.
    pub fn file(
        path: impl Into<String>,
        size: u64,
        modified_at: DateTime<Utc>,
        mode: u32,
        checksum: String,
    ) -> Self {
        Self {
            path: path.into(),
            size,
            modified_at,
            mode,
            is_dir: false,
            checksum: Some(checksum),
            children: None,
        }
    }

    /// Creates a directory entry. Children are attached by the walker once
    /// the subtree has been visited.
    pub fn directory(
        path: impl Into<String>,
        size: u64,
        modified_at: DateTime<Utc>,
        mode: u32,
    ) -> Self {
        Self {
            path: path.into(),
            size,
            modified_at,
            mode,
            is_dir: true,
            checksum: None,
            children: None,
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_file() -> Entry {
        Entry::file("docs/readme.txt", 12, Utc::now(), 0o644, "abc123".into())
    }

    #[test]
    fn test_file_entry_shape() {
        let e = sample_file();
        assert!(!e.is_dir);
        assert_eq!(e.checksum.as_deref(), Some("abc123"));
        assert!(e.children.is_none());
    }

    #[test]
    fn test_directory_entry_shape() {
        let e = Entry::directory("docs", 4096, Utc::now(), 0o755);
        assert!(e.is_dir);
        assert!(e.checksum.is_none());
        assert!(e.children.is_none());
    }

    #[test]
    fn test_serialization_omits_empty_fields() {
        let dir = Entry::directory("docs", 4096, Utc::now(), 0o755);
        let json = serde_json::to_string(&dir).unwrap();
        assert!(!json.contains("checksum"));
        assert!(!json.contains("children"));
    }

    #[test]
    fn test_serialization_roundtrip() {
        let mut dir = Entry::directory("docs", 4096, Utc::now(), 0o755);
        let file = sample_file();
        let mut children = BTreeMap::new();
        children.insert(file.path.clone(), file);
        dir.children = Some(children);

        let json = serde_json::to_string(&dir).unwrap();
        let back: Entry = serde_json::from_str(&json).unwrap();
        assert_eq!(dir, back);
    }
}
