//! Turns raw native flags into the logical event an observer sees.
//!
//! Native queues report what happened to the watched *entry*: the target
//! itself when it exists, otherwise its nearest existing ancestor. This
//! module decides what that means for the requested path:
//!
//! - changes under an ancestor are noise until the target appears (Create)
//! - delete followed by an immediate recreate is an in-place replace (Write)
//! - a rename followed by a new file at the old path is an editor save (Write)
//! - anything else is passed through, with the new location for renames

use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use super::ChangeFlags;
use super::paths::{FileId, PathOps, existing_parent, same_identity};

/// How long a rename waits for the original path to reappear.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Number of existence checks. Zero disables the wait.
    pub attempts: u32,
    /// Sleep between checks.
    pub interval: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, interval: Duration) -> Self {
        Self { attempts, interval }
    }

    /// Check `reappeared` up to `attempts` times, sleeping in between.
    ///
    /// Returns the 1-based attempt that succeeded.
    pub fn wait_for(&self, mut reappeared: impl FnMut() -> bool) -> Option<u32> {
        for attempt in 1..=self.attempts {
            if reappeared() {
                return Some(attempt);
            }
            if attempt < self.attempts && !self.interval.is_zero() {
                thread::sleep(self.interval);
            }
        }
        None
    }
}

/// What the watcher thread knows about one watch when an event arrives.
#[derive(Debug, Clone, Copy)]
pub struct WatchSnapshot<'a> {
    /// Path the client asked for.
    pub requested: &'a Path,
    /// Path actually armed: `requested` or its nearest existing ancestor.
    pub watched: &'a Path,
    /// Identity of the armed entry when it was armed.
    pub identity: Option<FileId>,
}

/// Notification to send to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub flags: ChangeFlags,
    pub new_path: Option<PathBuf>,
}

/// Outcome of resolving one batch of raw flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// `None` when the change happened to an ancestor and the target is
    /// still absent.
    pub delivery: Option<Delivery>,
    /// Close the current watch and arm again from scratch.
    pub reobserve: bool,
}

/// Resolve `raw` native flags for a watch.
pub fn resolve(
    snapshot: WatchSnapshot<'_>,
    raw: ChangeFlags,
    ops: &dyn PathOps,
    retry: &RetryPolicy,
) -> Resolution {
    let requested = snapshot.requested;
    let did_exist = requested == snapshot.watched;
    let boundary = existing_parent(ops, requested);
    let does_exist = requested == boundary;

    let mut reobserve = raw.contains(ChangeFlags::DELETE) || boundary != snapshot.watched;

    if !did_exist && !does_exist {
        return Resolution {
            delivery: None,
            reobserve,
        };
    }

    let mut flags = if did_exist { raw } else { ChangeFlags::CREATE };

    // Replaced in place: whoever reads the path now sees new content.
    if does_exist
        && did_exist
        && raw & (ChangeFlags::DELETE | ChangeFlags::WRITE) == ChangeFlags::DELETE
    {
        flags.remove(ChangeFlags::DELETE);
        flags.insert(ChangeFlags::WRITE);
    }

    let mut new_path = None;
    if flags.contains(ChangeFlags::RENAME) {
        let current = snapshot
            .identity
            .and_then(|id| ops.locate(snapshot.watched, id));

        // A case-only rename leaves both spellings naming one entry.
        let moved = match current.as_deref() {
            Some(current) => !same_identity(ops, requested, current),
            None => true,
        };

        let reappeared = moved && retry.wait_for(|| ops.exists(requested)).is_some();
        if reappeared {
            flags.remove(ChangeFlags::RENAME);
            flags.insert(ChangeFlags::WRITE);
            reobserve = true;
        } else {
            new_path = current;
        }
    }

    Resolution {
        delivery: Some(Delivery { flags, new_path }),
        reobserve,
    }
}
