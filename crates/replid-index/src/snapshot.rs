//! Directory snapshotting
//!
//! The walk reads one directory level at a time and recurses into
//! subdirectories, producing one [`Entry`] per direct child. Files are
//! checksummed over their full content (SHA-512, hex-encoded). Any read
//! failure aborts the whole walk - callers never see a truncated tree.

use std::collections::HashSet;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use replid_core::{Entry, Snapshot};
use sha2::{Digest, Sha512};
use tracing::debug;

use crate::error::IndexError;

/// Builds checksummed snapshots of a directory tree rooted at a fixed
/// serving root.
///
/// Requested paths are expressed relative to that root with a leading
/// slash; `"/"`, `""`, `".."`, and `"../"` all resolve to the root itself.
/// A configured set of file names (the daemon's own state files) is
/// excluded from every snapshot so replication never chases its own tail.
#[derive(Debug, Clone)]
pub struct Snapshotter {
    root: PathBuf,
    excluded: HashSet<String>,
}

impl Snapshotter {
    /// Creates a snapshotter serving `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            excluded: HashSet::new(),
        }
    }

    /// Excludes a file name (not a path) from every walk.
    pub fn exclude(mut self, name: impl Into<String>) -> Self {
        self.excluded.insert(name.into());
        self
    }

    /// The serving root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves a requested path against the serving root.
    ///
    /// Returns the absolute filesystem path and the canonical root-relative
    /// form (always beginning with `/`). Root aliases (`"/"`, `""`, `".."`,
    /// `"../"`) resolve to the root itself; anything else escaping the root
    /// is rejected.
    pub fn resolve(&self, requested: &str) -> Result<(PathBuf, String), IndexError> {
        let trimmed = requested.trim();
        if trimmed.is_empty() || trimmed == "/" || trimmed == ".." || trimmed == "../" {
            if trimmed.is_empty() {
                return Err(IndexError::InvalidPath(requested.to_string()));
            }
            return Ok((self.root.clone(), "/".to_string()));
        }

        let relative = trimmed.trim_start_matches('/');
        let mut absolute = self.root.clone();
        let mut canonical = String::new();
        for component in Path::new(relative).components() {
            match component {
                Component::Normal(part) => {
                    let part = part.to_string_lossy();
                    absolute.push(part.as_ref());
                    canonical.push('/');
                    canonical.push_str(&part);
                }
                Component::CurDir => {}
                _ => return Err(IndexError::InvalidPath(requested.to_string())),
            }
        }
        if canonical.is_empty() {
            return Ok((self.root.clone(), "/".to_string()));
        }

        if !absolute.exists() {
            return Err(IndexError::NotFound(requested.to_string()));
        }
        Ok((absolute, canonical))
    }

    /// Walks the requested directory and returns its snapshot.
    ///
    /// This is blocking filesystem work; async callers run it under
    /// `spawn_blocking`.
    pub fn snapshot(&self, requested: &str) -> Result<Snapshot, IndexError> {
        let (absolute, canonical) = self.resolve(requested)?;
        debug!(requested, path = %absolute.display(), "walking directory");
        self.walk(&absolute, &canonical)
    }

    fn walk(&self, dir: &Path, prefix: &str) -> Result<Snapshot, IndexError> {
        let mut snapshot = Snapshot::new();
        let entries = fs::read_dir(dir).map_err(|e| IndexError::io(dir, e))?;
        for dirent in entries {
            let dirent = dirent.map_err(|e| IndexError::io(dir, e))?;
            let name = dirent.file_name().to_string_lossy().into_owned();
            if self.excluded.contains(&name) {
                continue;
            }

            let child_abs = dirent.path();
            let child_path = if prefix == "/" {
                format!("/{name}")
            } else {
                format!("{prefix}/{name}")
            };

            let metadata = dirent
                .metadata()
                .map_err(|e| IndexError::io(&child_abs, e))?;
            let modified = modified_at(&metadata, &child_abs)?;
            let mode = metadata.permissions().mode() & 0o777;

            let entry = if metadata.is_dir() {
                let mut entry =
                    Entry::directory(child_path.clone(), metadata.len(), modified, mode);
                let children = self.walk(&child_abs, &child_path)?;
                if !children.is_empty() {
                    entry.children = Some(children);
                }
                entry
            } else {
                let checksum = checksum_file(&child_abs)?;
                Entry::file(child_path.clone(), metadata.len(), modified, mode, checksum)
            };
            snapshot.insert(child_path, entry);
        }
        Ok(snapshot)
    }
}

fn modified_at(
    metadata: &fs::Metadata,
    path: &Path,
) -> Result<DateTime<Utc>, IndexError> {
    let modified = metadata.modified().map_err(|e| IndexError::io(path, e))?;
    Ok(DateTime::<Utc>::from(modified))
}

/// SHA-512 over the file's full content, hex-encoded.
///
/// Fails on unreadable or vanished files; the caller aborts the walk.
pub fn checksum_file(path: &Path) -> Result<String, IndexError> {
    let content = fs::read(path).map_err(|e| IndexError::io(path, e))?;
    Ok(checksum_bytes(&content))
}

/// SHA-512 over a byte slice, hex-encoded.
pub fn checksum_bytes(content: &[u8]) -> String {
    let mut hasher = Sha512::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}
