//! Master-side half of the watcher: registration and the event pump.
//!
//! The coordinator owns the watcher thread and both channels. Registrations
//! may come from any thread; events are dispatched by whichever thread calls
//! the `pump*` methods, which the host treats as its master thread.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, unbounded};
use parking_lot::{Mutex, ReentrantMutex};

use super::handle::WatchCallback;
use super::server::{self, WatcherStats};
use super::{ClientId, Command, Event, WatchError};
use crate::config::WatcherConfig;

/// Host event-loop integration.
///
/// Called on the watcher thread each time an event has been queued, so the
/// host can schedule a `pump` on its master thread.
pub trait ReadySink: Send + Sync {
    fn notify_ready(&self);
}

impl<F> ReadySink for F
where
    F: Fn() + Send + Sync,
{
    fn notify_ready(&self) {
        self()
    }
}

/// Result of one pump step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpStatus {
    /// An event was handed to its callback.
    Dispatched,
    /// An event arrived for a client that is no longer registered.
    Dropped,
    /// Nothing to read.
    Empty,
    /// The watcher thread is gone and every event has been read.
    Closed,
}

/// Client table: id allocation plus the callback for each live id.
struct Clients {
    next: ClientId,
    callbacks: HashMap<ClientId, Arc<dyn WatchCallback>>,
}

/// Owner of the watcher thread.
///
/// Build one with [`Coordinator::builder`] and share it by `Arc`.
pub struct Coordinator {
    /// Reentrant so a callback running under the pump can add or remove
    /// watches.
    clients: ReentrantMutex<RefCell<Clients>>,
    /// `None` once shut down.
    commands: Mutex<Option<Sender<Command>>>,
    events: Receiver<Event>,
    thread: Mutex<Option<JoinHandle<WatcherStats>>>,
}

impl Coordinator {
    /// Create a builder for configuring the coordinator.
    pub fn builder() -> CoordinatorBuilder {
        CoordinatorBuilder::new()
    }

    /// Register `callback` for changes to `path`.
    ///
    /// Relative paths are resolved against the current directory. The path
    /// does not need to exist.
    pub fn add(&self, path: impl AsRef<Path>, callback: impl WatchCallback + 'static) -> ClientId {
        self.add_shared(path.as_ref(), Arc::new(callback))
    }

    pub(crate) fn add_shared(&self, path: &Path, callback: Arc<dyn WatchCallback>) -> ClientId {
        let path = std::path::absolute(path).unwrap_or_else(|e| {
            tracing::warn!("[coordinator] cannot absolutize {}: {e}", path.display());
            path.to_path_buf()
        });

        let client = {
            let guard = self.clients.lock();
            let mut clients = guard.borrow_mut();
            let client = clients.next;
            clients.next = client.next();
            clients.callbacks.insert(client, callback);
            client
        };

        crate::debug_event!("coordinator", "add", "{client} {}", path.display());
        self.send(Command::Register { client, path });
        client
    }

    /// Deregister a client.
    ///
    /// Once this returns, the client's callback is not running and will not
    /// be called again, except when called from inside that same callback.
    pub fn remove(&self, client: ClientId) {
        let removed = {
            let guard = self.clients.lock();
            guard.borrow_mut().callbacks.remove(&client)
        };
        if removed.is_none() {
            return;
        }

        crate::debug_event!("coordinator", "remove", "{client}");
        self.send(Command::Deregister { client });
    }

    fn send(&self, command: Command) {
        let sent = match self.commands.lock().as_ref() {
            Some(tx) => tx.send(command).map_err(|e| e.into_inner()),
            None => Err(command),
        };
        if let Err(command) = sent {
            // Shutdown is underway; nothing is left to watch for.
            crate::debug_event!("coordinator", "command dropped", "{command:?}");
        }
    }

    /// Dispatch at most one queued event without blocking.
    pub fn pump_one(&self) -> PumpStatus {
        match self.events.try_recv() {
            Ok(event) => self.dispatch(event),
            Err(TryRecvError::Empty) => PumpStatus::Empty,
            Err(TryRecvError::Disconnected) => PumpStatus::Closed,
        }
    }

    /// Dispatch every queued event.
    ///
    /// Returns the number of callbacks invoked.
    pub fn pump(&self) -> usize {
        let mut dispatched = 0;
        loop {
            match self.pump_one() {
                PumpStatus::Dispatched => dispatched += 1,
                PumpStatus::Dropped => {}
                PumpStatus::Empty | PumpStatus::Closed => return dispatched,
            }
        }
    }

    /// Wait up to `timeout` for one event and dispatch it.
    pub fn pump_timeout(&self, timeout: Duration) -> PumpStatus {
        match self.events.recv_timeout(timeout) {
            Ok(event) => self.dispatch(event),
            Err(RecvTimeoutError::Timeout) => PumpStatus::Empty,
            Err(RecvTimeoutError::Disconnected) => PumpStatus::Closed,
        }
    }

    fn dispatch(&self, event: Event) -> PumpStatus {
        // Held across the callback: a concurrent remove() waits for it.
        let guard = self.clients.lock();
        let callback = guard.borrow().callbacks.get(&event.client).cloned();

        match callback {
            Some(callback) => {
                callback.on_event(event.flags, event.new_path.as_deref());
                PumpStatus::Dispatched
            }
            None => {
                crate::debug_event!(
                    "coordinator",
                    "stale event",
                    "{} ({})",
                    event.client,
                    event.flags
                );
                PumpStatus::Dropped
            }
        }
    }

    /// Number of registered clients.
    pub fn client_count(&self) -> usize {
        self.clients.lock().borrow().callbacks.len()
    }

    /// Stop the watcher thread and wait for it.
    ///
    /// Closes every native watch. Returns the thread's counters on the first
    /// call and `None` afterwards. Later `add`/`remove` calls still update
    /// the client table but reach no watcher.
    pub fn shutdown(&self) -> Option<WatcherStats> {
        // Dropping the sender is the stop signal.
        drop(self.commands.lock().take());

        let handle = self.thread.lock().take()?;
        match handle.join() {
            Ok(stats) => {
                crate::log_event!("coordinator", "shut down", "{stats:?}");
                Some(stats)
            }
            Err(_) => {
                tracing::error!("[coordinator] watcher thread panicked");
                None
            }
        }
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Builder for constructing a [`Coordinator`].
pub struct CoordinatorBuilder {
    config: WatcherConfig,
    ready_sink: Option<Arc<dyn ReadySink>>,
}

impl CoordinatorBuilder {
    /// Create a new builder with defaults.
    pub fn new() -> Self {
        Self {
            config: WatcherConfig::default(),
            ready_sink: None,
        }
    }

    /// Set the watcher thread settings.
    pub fn settings(mut self, config: WatcherConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the sink signalled after each queued event.
    pub fn ready_sink(mut self, sink: impl ReadySink + 'static) -> Self {
        self.ready_sink = Some(Arc::new(sink));
        self
    }

    /// Start the watcher thread.
    pub fn build(self) -> Result<Arc<Coordinator>, WatchError> {
        let (command_tx, command_rx) = unbounded();
        let (event_tx, event_rx) = unbounded();

        let thread = server::spawn(&self.config, command_rx, event_tx, self.ready_sink)?;

        Ok(Arc::new(Coordinator {
            clients: ReentrantMutex::new(RefCell::new(Clients {
                next: ClientId::FIRST,
                callbacks: HashMap::new(),
            })),
            commands: Mutex::new(Some(command_tx)),
            events: event_rx,
            thread: Mutex::new(Some(thread)),
        }))
    }
}

impl Default for CoordinatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
