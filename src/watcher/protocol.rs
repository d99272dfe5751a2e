//! Messages exchanged between the coordinator and the watcher thread.

use std::fmt;
use std::num::NonZeroU64;
use std::path::PathBuf;

use super::ChangeFlags;

/// Identifier of one registration.
///
/// Allocated monotonically by the coordinator and never reused. There is no
/// zero id; "no client" is `Option<ClientId>::None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(NonZeroU64);

impl ClientId {
    /// The first id handed out by a coordinator.
    pub const FIRST: ClientId = ClientId(NonZeroU64::MIN);

    /// Wrap a raw id, `None` for zero.
    pub fn new(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(ClientId)
    }

    /// Raw numeric value.
    pub fn get(self) -> u64 {
        self.0.get()
    }

    /// The id allocated after this one.
    pub(crate) fn next(self) -> Self {
        ClientId(self.0.saturating_add(1))
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Control message from the coordinator to the watcher thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Start (or restart) watching `path` for `client`.
    Register { client: ClientId, path: PathBuf },
    /// Stop watching for `client`.
    Deregister { client: ClientId },
}

impl Command {
    pub fn client(&self) -> ClientId {
        match self {
            Command::Register { client, .. } | Command::Deregister { client } => *client,
        }
    }
}

/// Notification from the watcher thread to the event pump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub client: ClientId,
    pub flags: ChangeFlags,
    /// Current location of the watched entry, set only for renames.
    pub new_path: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_ids_start_at_one_and_increase() {
        let first = ClientId::FIRST;
        assert_eq!(first.get(), 1);
        assert_eq!(first.next().get(), 2);
        assert!(first < first.next());
        assert!(ClientId::new(0).is_none());
    }

    #[test]
    fn test_command_client() {
        let id = ClientId::new(7).unwrap();
        let register = Command::Register {
            client: id,
            path: PathBuf::from("/tmp/x"),
        };
        assert_eq!(register.client(), id);
        assert_eq!(Command::Deregister { client: id }.client(), id);
    }
}
