//! Observer handle: one watched path with one callback.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use super::{ChangeFlags, ClientId, Coordinator};

/// Receives change notifications for one watch.
///
/// Called only on the thread running the coordinator's pump.
pub trait WatchCallback: Send + Sync {
    /// `new_path` is the entry's current location after a rename.
    /// It is `None` when the entry moved out of its directory.
    fn on_event(&self, flags: ChangeFlags, new_path: Option<&Path>);
}

impl<F> WatchCallback for F
where
    F: Fn(ChangeFlags, Option<&Path>) + Send + Sync,
{
    fn on_event(&self, flags: ChangeFlags, new_path: Option<&Path>) {
        self(flags, new_path)
    }
}

/// A registered watch. Dropping it deregisters.
///
/// Holds a weak reference: the coordinator's lifetime is up to the host.
pub struct Watch {
    id: ClientId,
    path: PathBuf,
    coordinator: Weak<Coordinator>,
}

impl Watch {
    /// Start watching `path`. The path does not need to exist yet.
    pub fn new(
        coordinator: &Arc<Coordinator>,
        path: impl Into<PathBuf>,
        callback: impl WatchCallback + 'static,
    ) -> Self {
        let path = path.into();
        let id = coordinator.add_shared(&path, Arc::new(callback));
        Self {
            id,
            path,
            coordinator: Arc::downgrade(coordinator),
        }
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    /// The path as requested.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Watch {
    fn drop(&mut self) {
        if let Some(coordinator) = self.coordinator.upgrade() {
            coordinator.remove(self.id);
        }
    }
}

impl std::fmt::Debug for Watch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watch")
            .field("id", &self.id)
            .field("path", &self.path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ignore(_: ChangeFlags, _: Option<&Path>) {}

    #[test]
    fn test_drop_deregisters() {
        let coordinator = Coordinator::builder().build().unwrap();

        let watch = Watch::new(&coordinator, "/tmp/handle-test", ignore);
        assert_eq!(watch.path(), Path::new("/tmp/handle-test"));
        assert_eq!(coordinator.client_count(), 1);

        drop(watch);
        assert_eq!(coordinator.client_count(), 0);
    }

    #[test]
    fn test_handle_outliving_coordinator() {
        let coordinator = Coordinator::builder().build().unwrap();
        let watch = Watch::new(&coordinator, "/tmp/handle-test", ignore);
        let id = watch.id();

        drop(coordinator);
        assert_eq!(watch.id(), id);
        drop(watch);
    }
}
