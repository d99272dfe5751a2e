//! The watcher thread.
//!
//! Owns every watch and the native queue. The only way in is the control
//! channel and the only way out is the event channel, so nothing here is
//! shared or locked.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, after, never, select};

use super::coalesce::Coalescer;
use super::paths::{OsPaths, PathOps, existing_parent};
use super::queue::{ChangeQueue, Descriptor};
use super::resolve::{Resolution, RetryPolicy, WatchSnapshot, resolve};
use super::{ChangeFlags, ClientId, Command, Event, ReadySink, WatchError};
use crate::config::WatcherConfig;

/// Times `observe` tries again when the ancestor it picked vanished before
/// it could be armed.
const OBSERVE_ATTEMPTS: usize = 3;

/// Counters reported by the watcher thread when it exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatcherStats {
    /// Native watches opened.
    pub armed: u64,
    /// Native watches closed.
    pub disarmed: u64,
    /// Events sent to the coordinator.
    pub delivered: u64,
}

/// Watcher-thread record of one registration.
#[derive(Debug)]
struct WatchInfo {
    requested: PathBuf,
    /// `requested`, or its nearest existing ancestor.
    watched: PathBuf,
    /// `None` when arming failed.
    descriptor: Option<Descriptor>,
}

impl WatchInfo {
    fn snapshot(&self) -> WatchSnapshot<'_> {
        WatchSnapshot {
            requested: &self.requested,
            watched: &self.watched,
            identity: self.descriptor.as_ref().and_then(Descriptor::identity),
        }
    }
}

/// Start the watcher thread.
pub(crate) fn spawn(
    config: &WatcherConfig,
    commands: Receiver<Command>,
    events: Sender<Event>,
    sink: Option<Arc<dyn ReadySink>>,
) -> Result<JoinHandle<WatcherStats>, WatchError> {
    let coalescer = Coalescer::new(config.settle(), config.max_hold());
    let retry = config.retry_policy();

    thread::Builder::new()
        .name(config.thread_name.clone())
        .spawn(move || {
            let server = Server {
                commands,
                events,
                sink,
                queue: ChangeQueue::new(),
                watches: HashMap::new(),
                coalescer,
                retry,
                delivered: 0,
            };
            server.run()
        })
        .map_err(|e| WatchError::InitFailed {
            reason: format!("cannot spawn watcher thread: {e}"),
        })
}

struct Server {
    commands: Receiver<Command>,
    events: Sender<Event>,
    sink: Option<Arc<dyn ReadySink>>,
    queue: ChangeQueue,
    watches: HashMap<ClientId, WatchInfo>,
    coalescer: Coalescer,
    retry: RetryPolicy,
    delivered: u64,
}

impl Server {
    fn run(mut self) -> WatcherStats {
        crate::log_event!("server", "started");

        loop {
            let commands = self.commands.clone();
            let native = self.queue.events().clone();
            let settled = match self.coalescer.next_deadline() {
                Some(wait) => after(wait),
                None => never(),
            };

            select! {
                recv(commands) -> msg => match msg {
                    Ok(command) => self.handle_command(command),
                    Err(_) => {
                        crate::debug_event!("server", "control channel closed");
                        break;
                    }
                },
                recv(native) -> msg => match msg {
                    Ok(Ok(event)) => self.record(&event),
                    Ok(Err(e)) => {
                        let err = WatchError::EventError { details: e.to_string() };
                        tracing::warn!("[server] {err}");
                    }
                    Err(_) => {
                        tracing::error!("[server] native queue closed");
                        self.queue.detach_events();
                    }
                },
                recv(settled) -> _ => {
                    if let Err(e) = self.flush() {
                        tracing::warn!("[server] stopping: {e}");
                        break;
                    }
                }
            }
        }

        self.teardown()
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Register { client, path } => {
                crate::debug_event!("server", "register", "{client} {}", path.display());
                if let Some(previous) = self.watches.remove(&client) {
                    self.close(client, previous);
                }

                let mut info = WatchInfo {
                    watched: path.clone(),
                    requested: path,
                    descriptor: None,
                };
                observe(&mut self.queue, client, &mut info);
                self.watches.insert(client, info);
                crate::debug_event!(
                    "server",
                    "watching",
                    "{} clients on {} paths",
                    self.watches.len(),
                    self.queue.path_count()
                );
            }
            Command::Deregister { client } => {
                let known = self.watches.remove(&client);
                crate::debug_event!(
                    "server",
                    "deregister",
                    "{client}, known {}",
                    known.is_some()
                );
                if let Some(info) = known {
                    self.close(client, info);
                }
            }
        }
    }

    fn close(&mut self, client: ClientId, info: WatchInfo) {
        self.coalescer.remove(client);
        if let Some(descriptor) = info.descriptor {
            self.queue.disarm(descriptor);
        }
    }

    /// Fold a native event into the pending bursts.
    fn record(&mut self, event: &notify::Event) {
        for (client, flags) in self.queue.route(event) {
            if self.watches.contains_key(&client) {
                self.coalescer.record(client, flags);
            }
        }
    }

    /// Resolve and deliver every settled burst.
    fn flush(&mut self) -> Result<(), WatchError> {
        for (client, raw) in self.coalescer.take_ready() {
            self.process(client, raw.normalized())?;
        }
        Ok(())
    }

    fn process(&mut self, client: ClientId, raw: ChangeFlags) -> Result<(), WatchError> {
        let Some(info) = self.watches.get_mut(&client) else {
            return Ok(());
        };

        let Resolution {
            delivery,
            reobserve,
        } = resolve(info.snapshot(), raw, &OsPaths, &self.retry);

        if reobserve {
            if let Some(descriptor) = info.descriptor.take() {
                self.queue.disarm(descriptor);
            }
            observe(&mut self.queue, client, info);
        }

        let Some(delivery) = delivery else {
            crate::debug_event!("server", "ancestor change", "{client} ({raw})");
            return Ok(());
        };

        let flags = delivery.flags;
        crate::debug_event!("server", "event", "{client}: {flags} (raw {raw})");
        let event = Event {
            client,
            flags,
            new_path: delivery.new_path,
        };
        self.events
            .send(event)
            .map_err(|_| WatchError::ChannelClosed)?;
        self.delivered += 1;

        if let Some(sink) = &self.sink {
            sink.notify_ready();
        }
        Ok(())
    }

    fn teardown(mut self) -> WatcherStats {
        for (_, info) in self.watches.drain() {
            if let Some(descriptor) = info.descriptor {
                self.queue.disarm(descriptor);
            }
        }

        let stats = WatcherStats {
            armed: self.queue.armed_count(),
            disarmed: self.queue.disarmed_count(),
            delivered: self.delivered,
        };
        crate::log_event!(
            "server",
            "stopped",
            "{} delivered, {}/{} watches closed",
            stats.delivered,
            stats.disarmed,
            stats.armed
        );
        stats
    }
}

/// Arm a native watch on the requested path or its nearest existing ancestor.
///
/// On failure the watch stays unarmed; a later change to the ancestor it
/// would have used is the only thing that can bring it back.
fn observe(queue: &mut ChangeQueue, client: ClientId, info: &mut WatchInfo) {
    for _ in 0..OBSERVE_ATTEMPTS {
        info.watched = existing_parent(&OsPaths, &info.requested);
        match queue.arm(client, &info.watched) {
            Ok(descriptor) => {
                info.descriptor = Some(descriptor);
                return;
            }
            Err(e) if !OsPaths.exists(&info.watched) => {
                crate::debug_event!("server", "ancestor vanished", "{e}");
            }
            Err(e) => {
                tracing::warn!("[server] {e}");
                return;
            }
        }
    }
    tracing::warn!(
        "[server] gave up arming {} for client {client}",
        info.requested.display()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use std::fs;
    use std::path::Path;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn config() -> WatcherConfig {
        WatcherConfig {
            thread_name: "pathwatch-test".to_string(),
            settle_ms: 10,
            max_hold_ms: 100,
            rename_retries: 5,
            rename_retry_interval_us: 1_000,
        }
    }

    fn client(raw: u64) -> ClientId {
        ClientId::new(raw).unwrap()
    }

    fn wait_finished(handle: &JoinHandle<WatcherStats>, within: Duration) -> bool {
        let deadline = Instant::now() + within;
        while Instant::now() < deadline {
            if handle.is_finished() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        handle.is_finished()
    }

    fn register(tx: &Sender<Command>, id: u64, path: &Path) {
        tx.send(Command::Register {
            client: client(id),
            path: path.to_path_buf(),
        })
        .unwrap();
    }

    #[test]
    fn test_server_exits_when_control_channel_closes() {
        let temp = TempDir::new().unwrap();
        let (command_tx, command_rx) = unbounded();
        let (event_tx, _event_rx) = unbounded();
        let handle = spawn(&config(), command_rx, event_tx, None).unwrap();

        register(&command_tx, 1, temp.path());
        let absent = temp.path().join("missing").join("deeper");
        register(&command_tx, 2, &absent);
        let deregister = Command::Deregister { client: client(1) };
        command_tx.send(deregister).unwrap();
        drop(command_tx);

        let stats = handle.join().unwrap();
        assert_eq!(stats.armed, 2);
        assert_eq!(stats.disarmed, 2, "every armed watch is closed once");
    }

    #[test]
    fn test_server_delivers_write() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("file.txt");
        fs::write(&file, b"one").unwrap();

        let (command_tx, command_rx) = unbounded();
        let (event_tx, event_rx) = unbounded();
        let handle = spawn(&config(), command_rx, event_tx, None).unwrap();

        register(&command_tx, 1, &file);
        // Commands are processed in order; give the watch time to arm.
        thread::sleep(Duration::from_millis(100));
        fs::write(&file, b"two").unwrap();

        let event = event_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(event.client, client(1));
        assert!(event.flags.contains(ChangeFlags::WRITE));
        assert_eq!(event.new_path, None);

        drop(command_tx);
        let stats = handle.join().unwrap();
        assert!(stats.delivered >= 1);
    }

    #[test]
    fn test_server_stops_when_event_channel_is_gone() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("file.txt");
        fs::write(&file, b"one").unwrap();

        let (command_tx, command_rx) = unbounded();
        let (event_tx, event_rx) = unbounded();
        let handle = spawn(&config(), command_rx, event_tx, None).unwrap();

        register(&command_tx, 1, &file);
        thread::sleep(Duration::from_millis(100));
        drop(event_rx);
        fs::write(&file, b"two").unwrap();

        // The control channel is still open: only the failed send stops it.
        assert!(wait_finished(&handle, Duration::from_secs(5)));
        let stats = handle.join().unwrap();
        assert_eq!(stats.delivered, 0);
        assert_eq!(stats.armed, stats.disarmed);
        drop(command_tx);
    }

    #[test]
    fn test_server_notifies_ready_sink() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("file.txt");
        fs::write(&file, b"one").unwrap();

        let (ready_tx, ready_rx) = unbounded();
        let sink: Arc<dyn ReadySink> = Arc::new(move || {
            let _ = ready_tx.send(());
        });

        let (command_tx, command_rx) = unbounded();
        let (event_tx, event_rx) = unbounded();
        let handle = spawn(&config(), command_rx, event_tx, Some(sink)).unwrap();

        register(&command_tx, 1, &file);
        thread::sleep(Duration::from_millis(100));
        fs::write(&file, b"two").unwrap();

        ready_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(event_rx.try_recv().is_ok(), "queued before the signal");

        drop(command_tx);
        handle.join().unwrap();
    }
}
