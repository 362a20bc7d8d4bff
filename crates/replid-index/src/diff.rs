//! Snapshot diffing
//!
//! [`compare`] walks a remote snapshot against a local one and collects the
//! entries the local side needs: paths it lacks entirely, files whose
//! checksums differ, and entries whose type changed. Directories present on
//! both sides are recursed into rather than listed, so the need-list only
//! ever contains the most specific nodes.

use replid_core::{Entry, Snapshot};
use tracing::debug;

/// Computes the entries in `remote` that `local` is missing or has changed.
///
/// Rules, applied per remote path:
/// - absent locally: needed, whole entry (file or directory subtree);
/// - type differs between the two sides: needed, whole entry;
/// - directory on both sides: recurse into the children, never list the
///   directory itself;
/// - file on both sides: needed iff the checksums differ.
///
/// The output is ordered by the remote tree's path order, depth-first. An
/// entry returned whole never also has its descendants listed.
pub fn compare(local: &Snapshot, remote: &Snapshot) -> Vec<Entry> {
    let mut need = Vec::new();
    for (path, remote_entry) in remote {
        let Some(local_entry) = local.get(path) else {
            need.push(remote_entry.clone());
            continue;
        };

        if local_entry.is_dir != remote_entry.is_dir {
            // The path changed kind since the local copy was made; refetch
            // it whole and let the write replace whatever is there.
            debug!(path, "type mismatch between local and remote");
            need.push(remote_entry.clone());
            continue;
        }

        if remote_entry.is_dir {
            if let Some(remote_children) = &remote_entry.children {
                let empty = Snapshot::new();
                let local_children = local_entry.children.as_ref().unwrap_or(&empty);
                need.extend(compare(local_children, remote_children));
            }
        } else if local_entry.checksum != remote_entry.checksum {
            debug!(path, "checksum mismatch");
            need.push(remote_entry.clone());
        }
    }
    need
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;

    use super::*;

    fn file(path: &str, checksum: &str) -> Entry {
        Entry::file(path, 1, Utc::now(), 0o644, checksum.to_string())
    }

    fn dir(path: &str, children: Vec<Entry>) -> Entry {
        let mut entry = Entry::directory(path, 4096, Utc::now(), 0o755);
        if !children.is_empty() {
            let mut map = BTreeMap::new();
            for child in children {
                map.insert(child.path.clone(), child);
            }
            entry.children = Some(map);
        }
        entry
    }

    fn snapshot(entries: Vec<Entry>) -> Snapshot {
        entries.into_iter().map(|e| (e.path.clone(), e)).collect()
    }

    #[test]
    fn test_identical_snapshots_need_nothing() {
        let s = snapshot(vec![
            file("/a.txt", "aaa"),
            dir("/sub", vec![file("/sub/b.txt", "bbb")]),
        ]);
        assert!(compare(&s, &s).is_empty());
    }

    #[test]
    fn test_missing_file_is_needed() {
        let local = snapshot(vec![file("/a.txt", "aaa")]);
        let remote = snapshot(vec![file("/a.txt", "aaa"), file("/b.txt", "bbb")]);
        let need = compare(&local, &remote);
        assert_eq!(need.len(), 1);
        assert_eq!(need[0].path, "/b.txt");
    }

    #[test]
    fn test_missing_directory_is_needed_whole() {
        let local = snapshot(vec![]);
        let remote = snapshot(vec![dir("/sub", vec![file("/sub/b.txt", "bbb")])]);
        let need = compare(&local, &remote);
        // Only the directory itself; its children ride along inside it.
        assert_eq!(need.len(), 1);
        assert_eq!(need[0].path, "/sub");
        assert!(need[0].is_dir);
    }

    #[test]
    fn test_checksum_mismatch_is_needed() {
        let local = snapshot(vec![file("/a.txt", "old")]);
        let remote = snapshot(vec![file("/a.txt", "new")]);
        let need = compare(&local, &remote);
        assert_eq!(need.len(), 1);
        assert_eq!(need[0].path, "/a.txt");
    }

    #[test]
    fn test_type_mismatch_is_needed() {
        let local = snapshot(vec![file("/thing", "aaa")]);
        let remote = snapshot(vec![dir("/thing", vec![file("/thing/x", "xxx")])]);
        let need = compare(&local, &remote);
        assert_eq!(need.len(), 1);
        assert_eq!(need[0].path, "/thing");
        assert!(need[0].is_dir);
    }

    #[test]
    fn test_changed_file_and_new_file_in_subdir() {
        // Local: a.txt ("hello"), sub/b.txt ("world").
        // Remote: a.txt changed, sub/b.txt unchanged, sub/c.txt new.
        let local = snapshot(vec![
            file("/a.txt", "hash-hello"),
            dir("/sub", vec![file("/sub/b.txt", "hash-world")]),
        ]);
        let remote = snapshot(vec![
            file("/a.txt", "hash-HELLO"),
            dir(
                "/sub",
                vec![file("/sub/b.txt", "hash-world"), file("/sub/c.txt", "hash-c")],
            ),
        ]);

        let need = compare(&local, &remote);
        let paths: Vec<&str> = need.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["/a.txt", "/sub/c.txt"]);
    }

    #[test]
    fn test_local_extras_are_ignored() {
        // The server is authoritative but the diff never asks to delete.
        let local = snapshot(vec![file("/a.txt", "aaa"), file("/stale.txt", "zzz")]);
        let remote = snapshot(vec![file("/a.txt", "aaa")]);
        assert!(compare(&local, &remote).is_empty());
    }

    #[test]
    fn test_empty_local_directory_recurses_into_remote_children() {
        let local = snapshot(vec![dir("/sub", vec![])]);
        let remote = snapshot(vec![dir("/sub", vec![file("/sub/b.txt", "bbb")])]);
        let need = compare(&local, &remote);
        assert_eq!(need.len(), 1);
        assert_eq!(need[0].path, "/sub/b.txt");
    }

    #[test]
    fn test_no_ancestor_listed_with_descendant() {
        let local = snapshot(vec![dir("/sub", vec![file("/sub/b.txt", "old")])]);
        let remote = snapshot(vec![dir(
            "/sub",
            vec![file("/sub/b.txt", "new"), file("/sub/c.txt", "ccc")],
        )]);

        let need = compare(&local, &remote);
        let paths: Vec<&str> = need.iter().map(|e| e.path.as_str()).collect();
        assert!(!paths.contains(&"/sub"));
        assert_eq!(paths, vec!["/sub/b.txt", "/sub/c.txt"]);
    }
}
