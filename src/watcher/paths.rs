//! Path utilities used by the watcher thread.
//!
//! Resolution only needs a handful of questions answered about the file
//! system. They sit behind [`PathOps`] so the resolution rules can be
//! exercised against a scripted file system.

use std::fs;
use std::path::{Path, PathBuf};

/// Device and inode of a file system entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId {
    pub device: u64,
    pub inode: u64,
}

/// File system queries needed to resolve native events.
pub trait PathOps {
    /// Whether an entry exists at `path`.
    fn exists(&self, path: &Path) -> bool;

    /// Identity of the entry at `path`, if it can be stat'ed.
    fn identity(&self, path: &Path) -> Option<FileId>;

    /// Current location of the entry with `identity` that used to live at
    /// `origin`.
    fn locate(&self, origin: &Path, identity: FileId) -> Option<PathBuf>;
}

/// Nearest existing ancestor of `path`, or `path` itself if it exists.
///
/// Stops at the root even if the root does not answer `exists`.
pub fn existing_parent(ops: &dyn PathOps, path: &Path) -> PathBuf {
    let mut current = path;
    while !ops.exists(current) {
        match current.parent() {
            Some(parent) => current = parent,
            None => break,
        }
    }
    current.to_path_buf()
}

/// Whether two distinct paths name the same entry.
///
/// Equal paths are not "shared", and a path that cannot be stat'ed shares
/// nothing.
pub fn same_identity(ops: &dyn PathOps, lhs: &Path, rhs: &Path) -> bool {
    if lhs == rhs {
        return false;
    }
    match (ops.identity(lhs), ops.identity(rhs)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// [`PathOps`] backed by the real file system.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsPaths;

impl PathOps for OsPaths {
    fn exists(&self, path: &Path) -> bool {
        // symlink_metadata: a dangling link still occupies the name
        fs::symlink_metadata(path).is_ok()
    }

    fn identity(&self, path: &Path) -> Option<FileId> {
        let metadata = fs::symlink_metadata(path).ok()?;
        file_id(&metadata)
    }

    fn locate(&self, origin: &Path, identity: FileId) -> Option<PathBuf> {
        // Scan rather than stat `origin`: on a case-insensitive volume the
        // old spelling still resolves, but the directory lists the new one.
        let dir = origin.parent()?;
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                crate::debug_event!("paths", "read_dir failed", "{}: {e}", dir.display());
                return None;
            }
        };

        entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .find(|candidate| self.identity(candidate) == Some(identity))
    }
}

#[cfg(unix)]
fn file_id(metadata: &fs::Metadata) -> Option<FileId> {
    use std::os::unix::fs::MetadataExt;
    Some(FileId {
        device: metadata.dev(),
        inode: metadata.ino(),
    })
}

#[cfg(not(unix))]
fn file_id(_metadata: &fs::Metadata) -> Option<FileId> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_existing_parent_walks_up() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::create_dir(root.join("a")).unwrap();

        let target = root.join("a").join("b").join("c");
        assert_eq!(existing_parent(&OsPaths, &target), root.join("a"));

        fs::create_dir_all(root.join("a").join("b")).unwrap();
        fs::write(&target, b"x").unwrap();
        assert_eq!(existing_parent(&OsPaths, &target), target);
    }

    #[test]
    fn test_existing_parent_stops_at_root() {
        struct Nothing;
        impl PathOps for Nothing {
            fn exists(&self, _: &Path) -> bool {
                false
            }
            fn identity(&self, _: &Path) -> Option<FileId> {
                None
            }
            fn locate(&self, _: &Path, _: FileId) -> Option<PathBuf> {
                None
            }
        }

        assert_eq!(
            existing_parent(&Nothing, Path::new("/x/y/z")),
            PathBuf::from("/")
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_same_identity() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("a");
        let b = temp.path().join("b");
        fs::write(&a, b"x").unwrap();
        fs::hard_link(&a, &b).unwrap();

        assert!(same_identity(&OsPaths, &a, &b));
        assert!(!same_identity(&OsPaths, &a, &a));
        assert!(!same_identity(&OsPaths, &a, &temp.path().join("missing")));
    }

    #[cfg(unix)]
    #[test]
    fn test_locate_follows_rename_within_directory() {
        let temp = TempDir::new().unwrap();
        let before = temp.path().join("before.txt");
        let after = temp.path().join("after.txt");
        fs::write(&before, b"x").unwrap();
        let id = OsPaths.identity(&before).unwrap();

        fs::rename(&before, &after).unwrap();

        assert_eq!(OsPaths.locate(&before, id), Some(after));
    }

    #[cfg(unix)]
    #[test]
    fn test_locate_gives_up_when_entry_left_directory() {
        let temp = TempDir::new().unwrap();
        let before = temp.path().join("file.txt");
        fs::write(&before, b"x").unwrap();
        let id = OsPaths.identity(&before).unwrap();

        let moved = temp.path().join("sub");
        fs::create_dir(&moved).unwrap();
        fs::rename(&before, moved.join("file.txt")).unwrap();

        assert_eq!(OsPaths.locate(&before, id), None);
    }
}
