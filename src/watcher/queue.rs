//! Native change queue shared by every watch.
//!
//! One non-recursive `notify` watcher carries all armed paths. Paths are
//! ref-counted in an [`ArmTable`] so several clients can arm the same entry
//! and the native watch goes away with the last of them.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use crossbeam_channel::{Receiver, never, unbounded};
use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use super::paths::{FileId, OsPaths, PathOps};
use super::{ChangeFlags, ClientId, WatchError};

type RawEvent = notify::Result<notify::Event>;

/// An armed native watch owned by one client.
///
/// Not `Clone`: handing it back to [`ChangeQueue::disarm`] is the only way
/// to close it, so it is closed exactly once.
#[derive(Debug)]
pub struct Descriptor {
    client: ClientId,
    path: PathBuf,
    identity: Option<FileId>,
}

impl Descriptor {
    /// The path the native watch was armed on.
    #[cfg(test)]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Identity of the armed entry at arm time.
    pub fn identity(&self) -> Option<FileId> {
        self.identity
    }
}

#[derive(Debug, Default)]
struct Armed {
    clients: HashSet<ClientId>,
    /// The native watch no longer tracks this path (entry removed or moved).
    stale: bool,
}

/// Armed paths and the clients interested in each.
#[derive(Debug, Default)]
pub struct ArmTable {
    armed: HashMap<PathBuf, Armed>,
}

impl ArmTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether arming `path` needs a fresh native watch.
    pub fn needs_native(&self, path: &Path) -> bool {
        self.armed.get(path).is_none_or(|armed| armed.stale)
    }

    pub fn is_stale(&self, path: &Path) -> bool {
        self.armed.get(path).is_some_and(|armed| armed.stale)
    }

    /// Record that a native watch for `path` is live.
    pub fn mark_live(&mut self, path: &Path) {
        self.armed.entry(path.to_path_buf()).or_default().stale = false;
    }

    /// Add `client` to `path`.
    pub fn insert(&mut self, path: &Path, client: ClientId) {
        self.armed
            .entry(path.to_path_buf())
            .or_default()
            .clients
            .insert(client);
    }

    /// Remove `client` from `path`.
    ///
    /// Returns true when it was the last client on that path.
    pub fn remove(&mut self, path: &Path, client: ClientId) -> bool {
        let Some(armed) = self.armed.get_mut(path) else {
            return false;
        };
        armed.clients.remove(&client);
        if armed.clients.is_empty() {
            self.armed.remove(path);
            true
        } else {
            false
        }
    }

    #[cfg(test)]
    pub fn contains(&self, path: &Path) -> bool {
        self.armed.contains_key(path)
    }

    pub fn path_count(&self) -> usize {
        self.armed.len()
    }

    /// Map one native event to raw flags per interested client.
    ///
    /// Clients armed on an event path get the change to the entry itself.
    /// Clients armed on its parent directory see entry-level changes
    /// (create, remove, rename) as a write to the directory.
    pub fn route(&mut self, event: &notify::Event) -> Vec<(ClientId, ChangeFlags)> {
        let mut routed: Vec<(ClientId, ChangeFlags)> = Vec::new();
        let mut push = |client: ClientId, flags: ChangeFlags| {
            if flags.is_empty() {
                return;
            }
            match routed.iter_mut().find(|(c, _)| *c == client) {
                Some((_, existing)) => *existing |= flags,
                None => routed.push((client, flags)),
            }
        };

        let entry_change = matches!(
            event.kind,
            EventKind::Create(_) | EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(_))
        );
        let detaches = matches!(
            event.kind,
            EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(_))
        );

        for (index, path) in event.paths.iter().enumerate() {
            if let Some(armed) = self.armed.get_mut(path) {
                if detaches {
                    armed.stale = true;
                }
                let flags = self_flags(&event.kind, index);
                for client in &armed.clients {
                    push(*client, flags);
                }
            }

            if entry_change {
                if let Some(armed) = path.parent().and_then(|parent| self.armed.get(parent)) {
                    for client in &armed.clients {
                        push(*client, ChangeFlags::WRITE);
                    }
                }
            }
        }

        routed
    }
}

/// Flags for a change to an armed entry itself.
///
/// `index` is the position of the path in the event; for a two-path rename
/// the second path is the destination, whose previous entry was replaced.
fn self_flags(kind: &EventKind, index: usize) -> ChangeFlags {
    match kind {
        EventKind::Create(_) => ChangeFlags::WRITE,
        EventKind::Remove(_) => ChangeFlags::DELETE,
        EventKind::Modify(ModifyKind::Metadata(_)) => ChangeFlags::ATTRIBUTE_CHANGE,
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => ChangeFlags::WRITE,
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if index > 0 => ChangeFlags::WRITE,
        EventKind::Modify(ModifyKind::Name(_)) => ChangeFlags::RENAME,
        EventKind::Modify(_) => ChangeFlags::WRITE,
        // access, any, other
        _ => ChangeFlags::empty(),
    }
}

/// The single native queue used by the watcher thread.
pub struct ChangeQueue {
    /// `None` when the native watcher could not be created.
    watcher: Option<RecommendedWatcher>,
    events: Receiver<RawEvent>,
    table: ArmTable,
    armed: u64,
    disarmed: u64,
}

impl ChangeQueue {
    /// Create the native watcher.
    ///
    /// Failure is logged and leaves a queue on which every arm fails.
    pub fn new() -> Self {
        let (tx, rx) = unbounded();

        let watcher = notify::recommended_watcher(move |res: RawEvent| {
            let _ = tx.send(res);
        });

        match watcher {
            Ok(watcher) => Self::with_parts(Some(watcher), rx),
            Err(e) => {
                tracing::error!("[queue] failed to create native watcher: {e}");
                Self::with_parts(None, never())
            }
        }
    }

    fn with_parts(watcher: Option<RecommendedWatcher>, events: Receiver<RawEvent>) -> Self {
        Self {
            watcher,
            events,
            table: ArmTable::new(),
            armed: 0,
            disarmed: 0,
        }
    }

    /// Raw native events, for use in a `select!`.
    pub fn events(&self) -> &Receiver<RawEvent> {
        &self.events
    }

    /// Stop listening for native events after the source went away.
    pub fn detach_events(&mut self) {
        self.events = never();
    }

    /// Arm a native watch on `path` for `client`.
    pub fn arm(&mut self, client: ClientId, path: &Path) -> Result<Descriptor, WatchError> {
        if self.table.needs_native(path) {
            let watcher = self
                .watcher
                .as_mut()
                .ok_or_else(|| WatchError::PathWatchFailed {
                    path: path.to_path_buf(),
                    reason: "native watcher unavailable".to_string(),
                })?;

            if self.table.is_stale(path) {
                // The old native watch may already be gone; only the new one matters.
                let _ = watcher.unwatch(path);
            }

            watcher
                .watch(path, RecursiveMode::NonRecursive)
                .map_err(|e| WatchError::PathWatchFailed {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })?;
            self.table.mark_live(path);
            crate::debug_event!("queue", "armed", "{}", path.display());
        }

        self.table.insert(path, client);
        self.armed += 1;

        Ok(Descriptor {
            client,
            path: path.to_path_buf(),
            identity: OsPaths.identity(path),
        })
    }

    /// Close a descriptor.
    pub fn disarm(&mut self, descriptor: Descriptor) {
        self.disarmed += 1;

        if !self.table.remove(&descriptor.path, descriptor.client) {
            return;
        }

        if let Some(watcher) = self.watcher.as_mut() {
            match watcher.unwatch(&descriptor.path) {
                Ok(()) => {
                    crate::debug_event!("queue", "disarmed", "{}", descriptor.path.display());
                }
                Err(e) => {
                    // Removed entries take their native watch with them.
                    crate::debug_event!(
                        "queue",
                        "unwatch skipped",
                        "{}: {e}",
                        descriptor.path.display()
                    );
                }
            }
        }
    }

    /// Map a native event to raw flags per client.
    pub fn route(&mut self, event: &notify::Event) -> Vec<(ClientId, ChangeFlags)> {
        self.table.route(event)
    }

    /// Descriptors armed so far.
    pub fn armed_count(&self) -> u64 {
        self.armed
    }

    /// Descriptors closed so far.
    pub fn disarmed_count(&self) -> u64 {
        self.disarmed
    }

    /// Distinct paths with a native watch.
    pub fn path_count(&self) -> usize {
        self.table.path_count()
    }
}

impl Default for ChangeQueue {
    fn default() -> Self {
        Self::new()
    }
}
