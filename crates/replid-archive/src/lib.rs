//! Subtree archiving for directory transfers
//!
//! A directory fetched over the wire travels as a single tar stream:
//! [`pack`] serializes everything under a path (files, directories,
//! symlinks) preserving relative paths, sizes, permission bits, and entry
//! type; [`unpack`] recreates that tree under a destination root.
//!
//! Unpack ordering: directories are created before the files inside them,
//! a file's permission bits are applied only after its content write
//! completes, and directory modes are finalized last, once every
//! descendant exists. A malformed or truncated stream aborts the whole
//! unpack - there is no partial-commit recovery.

use std::fs;
use std::io::{Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

/// Content type tag for directory sync responses.
pub const TAR_CONTENT_TYPE: &str = "application/x-tar";

/// Errors raised while packing or unpacking an archive stream.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Reading or writing a filesystem path failed.
    #[error("filesystem error at {path}: {source}")]
    Io {
        /// The path that failed.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The archive stream itself could not be read or written.
    #[error("archive stream error: {0}")]
    Stream(#[source] std::io::Error),

    /// The stream decoded but carried an entry we refuse to apply.
    #[error("malformed archive entry: {0}")]
    Malformed(String),
}

impl ArchiveError {
    fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Streams a tar archive of everything under `src` into `sink`.
///
/// Entries are named `name`, `name/child`, ... so the unpacked tree lands
/// at `name` under the destination root; `name` is slash-separated with no
/// leading slash. The walk is sorted, making the stream deterministic for
/// a given tree.
pub fn pack<W: Write>(src: &Path, name: &str, sink: W) -> Result<(), ArchiveError> {
    let mut builder = tar::Builder::new(sink);
    builder.follow_symlinks(false);

    for dirent in WalkDir::new(src).follow_links(false).sort_by_file_name() {
        let dirent = dirent.map_err(|e| {
            let path = e.path().unwrap_or(src).to_path_buf();
            match e.into_io_error() {
                Some(io) => ArchiveError::io(path, io),
                None => ArchiveError::Malformed(format!("walk loop at {}", path.display())),
            }
        })?;

        let rel = dirent
            .path()
            .strip_prefix(src)
            .map_err(|_| ArchiveError::Malformed(format!("{} outside {}", dirent.path().display(), src.display())))?;
        let archive_name = if rel.as_os_str().is_empty() {
            PathBuf::from(name)
        } else {
            Path::new(name).join(rel)
        };

        debug!(entry = %archive_name.display(), "packing");
        builder
            .append_path_with_name(dirent.path(), &archive_name)
            .map_err(|e| ArchiveError::io(dirent.path(), e))?;
    }

    builder.finish().map_err(ArchiveError::Stream)
}

/// Reads a tar stream and recreates its tree under `dest`.
///
/// Entry paths are sanitized: absolute prefixes are stripped and any
/// parent-directory component rejects the whole stream. The first error of
/// any kind aborts the unpack immediately.
pub fn unpack<R: Read>(source: R, dest: &Path) -> Result<(), ArchiveError> {
    let mut archive = tar::Archive::new(source);
    let mut dir_modes: Vec<(PathBuf, u32)> = Vec::new();

    for entry in archive.entries().map_err(ArchiveError::Stream)? {
        let mut entry = entry.map_err(ArchiveError::Stream)?;
        let rel = entry
            .path()
            .map_err(ArchiveError::Stream)?
            .into_owned();
        let target = sanitize(dest, &rel)?;
        let mode = entry.header().mode().map_err(ArchiveError::Stream)? & 0o777;

        let entry_type = entry.header().entry_type();
        if entry_type.is_dir() {
            debug!(path = %target.display(), "creating directory");
            fs::create_dir_all(&target).map_err(|e| ArchiveError::io(&target, e))?;
            dir_modes.push((target, mode));
        } else if entry_type.is_symlink() {
            let link = entry
                .link_name()
                .map_err(ArchiveError::Stream)?
                .ok_or_else(|| {
                    ArchiveError::Malformed(format!("symlink without target: {}", rel.display()))
                })?;
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|e| ArchiveError::io(parent, e))?;
            }
            // Replace whatever is already there; a stale link would make
            // symlink() fail with EEXIST.
            match fs::remove_file(&target) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(ArchiveError::io(&target, e)),
            }
            debug!(path = %target.display(), target = %link.display(), "creating symlink");
            std::os::unix::fs::symlink(&link, &target)
                .map_err(|e| ArchiveError::io(&target, e))?;
        } else if entry_type.is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|e| ArchiveError::io(parent, e))?;
            }
            debug!(path = %target.display(), "writing file");
            let mut file = fs::File::create(&target).map_err(|e| ArchiveError::io(&target, e))?;
            std::io::copy(&mut entry, &mut file).map_err(|e| ArchiveError::io(&target, e))?;
            drop(file);
            // Mode goes on only after the content is fully written.
            fs::set_permissions(&target, fs::Permissions::from_mode(mode))
                .map_err(|e| ArchiveError::io(&target, e))?;
        } else {
            // Device nodes, FIFOs and the like have no business in a
            // replicated tree.
            return Err(ArchiveError::Malformed(format!(
                "unsupported entry type {:?} for {}",
                entry_type,
                rel.display()
            )));
        }
    }

    // Directory modes last: every descendant exists by now, and a
    // read-only directory mode would otherwise block its own children.
    for (path, mode) in dir_modes.into_iter().rev() {
        fs::set_permissions(&path, fs::Permissions::from_mode(mode))
            .map_err(|e| ArchiveError::io(&path, e))?;
    }

    Ok(())
}

/// Joins an archive-relative path under `dest`, refusing parent components
/// and ignoring absolute markers.
fn sanitize(dest: &Path, rel: &Path) -> Result<PathBuf, ArchiveError> {
    let mut target = dest.to_path_buf();
    for component in rel.components() {
        match component {
            Component::Normal(part) => target.push(part),
            Component::CurDir => {}
            Component::RootDir | Component::Prefix(_) => {}
            Component::ParentDir => {
                return Err(ArchiveError::Malformed(format!(
                    "entry escapes destination: {}",
                    rel.display()
                )));
            }
        }
    }
    Ok(target)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use tempfile::TempDir;

    use super::*;

    fn write_file(root: &Path, rel: &str, content: &[u8], mode: u32) {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(mode)).unwrap();
    }

    /// Collects (relative path, size, mode, is_dir) for every entry under
    /// `root`, sorted by path.
    fn tree_facts(root: &Path) -> BTreeMap<String, (u64, u32, bool)> {
        let mut facts = BTreeMap::new();
        for dirent in WalkDir::new(root).follow_links(false).min_depth(1) {
            let dirent = dirent.unwrap();
            let rel = dirent
                .path()
                .strip_prefix(root)
                .unwrap()
                .to_string_lossy()
                .into_owned();
            let meta = dirent.metadata().unwrap();
            let size = if meta.is_dir() { 0 } else { meta.len() };
            facts.insert(rel, (size, meta.permissions().mode() & 0o777, meta.is_dir()));
        }
        facts
    }

    #[test]
    fn test_roundtrip_preserves_paths_sizes_modes() {
        let src = TempDir::new().unwrap();
        write_file(src.path(), "a.txt", b"hello", 0o644);
        write_file(src.path(), "tool.sh", b"#!/bin/sh\n", 0o755);
        write_file(src.path(), "sub/deep/b.txt", b"world!", 0o600);

        let mut buffer = Vec::new();
        pack(src.path(), "tree", &mut buffer).unwrap();

        let dest = TempDir::new().unwrap();
        unpack(buffer.as_slice(), dest.path()).unwrap();

        let original = tree_facts(src.path());
        let unpacked = tree_facts(&dest.path().join("tree"));
        assert_eq!(original, unpacked);
    }

    #[test]
    fn test_roundtrip_preserves_symlinks() {
        let src = TempDir::new().unwrap();
        write_file(src.path(), "real.txt", b"content", 0o644);
        std::os::unix::fs::symlink("real.txt", src.path().join("link.txt")).unwrap();

        let mut buffer = Vec::new();
        pack(src.path(), "d", &mut buffer).unwrap();

        let dest = TempDir::new().unwrap();
        unpack(buffer.as_slice(), dest.path()).unwrap();

        let link = dest.path().join("d/link.txt");
        let meta = fs::symlink_metadata(&link).unwrap();
        assert!(meta.file_type().is_symlink());
        assert_eq!(fs::read_link(&link).unwrap(), PathBuf::from("real.txt"));
    }

    #[test]
    fn test_unpack_nested_archive_name() {
        let src = TempDir::new().unwrap();
        write_file(src.path(), "b.txt", b"nested", 0o644);

        let mut buffer = Vec::new();
        pack(src.path(), "x/y/sub", &mut buffer).unwrap();

        let dest = TempDir::new().unwrap();
        unpack(buffer.as_slice(), dest.path()).unwrap();
        assert_eq!(
            fs::read(dest.path().join("x/y/sub/b.txt")).unwrap(),
            b"nested"
        );
    }

    #[test]
    fn test_truncated_stream_aborts() {
        let src = TempDir::new().unwrap();
        write_file(src.path(), "a.txt", &[7u8; 4096], 0o644);

        let mut buffer = Vec::new();
        pack(src.path(), "t", &mut buffer).unwrap();
        buffer.truncate(buffer.len() / 2);

        let dest = TempDir::new().unwrap();
        assert!(unpack(buffer.as_slice(), dest.path()).is_err());
    }

    #[test]
    fn test_garbage_stream_aborts() {
        let dest = TempDir::new().unwrap();
        let garbage = [0xabu8; 1024];
        assert!(unpack(garbage.as_slice(), dest.path()).is_err());
    }

    #[test]
    fn test_escaping_entry_rejected() {
        let err = sanitize(Path::new("/tmp/dest"), Path::new("../../etc/passwd")).unwrap_err();
        assert!(matches!(err, ArchiveError::Malformed(_)));
    }

    #[test]
    fn test_file_modes_applied_after_content() {
        // A read-only file must still arrive with its content intact;
        // writing content after chmod would fail.
        let src = TempDir::new().unwrap();
        write_file(src.path(), "ro.txt", b"locked down", 0o400);

        let mut buffer = Vec::new();
        pack(src.path(), "t", &mut buffer).unwrap();

        let dest = TempDir::new().unwrap();
        unpack(buffer.as_slice(), dest.path()).unwrap();

        let target = dest.path().join("t/ro.txt");
        assert_eq!(fs::read(&target).unwrap(), b"locked down");
        assert_eq!(fs::metadata(&target).unwrap().permissions().mode() & 0o777, 0o400);
    }

    #[test]
    fn test_readonly_directory_mode_finalized_last() {
        let src = TempDir::new().unwrap();
        write_file(src.path(), "ro_dir/inner.txt", b"inside", 0o644);
        fs::set_permissions(
            src.path().join("ro_dir"),
            fs::Permissions::from_mode(0o555),
        )
        .unwrap();

        let mut buffer = Vec::new();
        pack(src.path(), "t", &mut buffer).unwrap();

        // Restore so TempDir cleanup can remove the source.
        fs::set_permissions(
            src.path().join("ro_dir"),
            fs::Permissions::from_mode(0o755),
        )
        .unwrap();

        let dest = TempDir::new().unwrap();
        unpack(buffer.as_slice(), dest.path()).unwrap();

        let dir = dest.path().join("t/ro_dir");
        assert_eq!(fs::metadata(&dir).unwrap().permissions().mode() & 0o777, 0o555);
        assert_eq!(fs::read(dir.join("inner.txt")).unwrap(), b"inside");

        fs::set_permissions(&dir, fs::Permissions::from_mode(0o755)).unwrap();
    }
}
