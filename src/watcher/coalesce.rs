//! Coalescing of native event bursts per client.
//!
//! A single user action often produces several native events in quick
//! succession (attribute + delete on unlink, modify + close on save, the
//! same change seen through a file watch and its directory watch). They are
//! folded into one set of raw flags before resolution.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::{ChangeFlags, ClientId};

#[derive(Debug, Clone, Copy)]
struct Pending {
    flags: ChangeFlags,
    first_seen: Instant,
    last_seen: Instant,
}

/// Accumulates raw flags per client until the burst settles.
#[derive(Debug)]
pub struct Coalescer {
    pending: HashMap<ClientId, Pending>,
    /// How long a client must be quiet before its flags are released.
    settle: Duration,
    /// Upper bound on how long flags are held while events keep coming.
    max_hold: Duration,
}

impl Coalescer {
    pub fn new(settle: Duration, max_hold: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            settle,
            max_hold: max_hold.max(settle),
        }
    }

    fn release_at(&self, p: &Pending) -> Instant {
        (p.last_seen + self.settle).min(p.first_seen + self.max_hold)
    }

    /// Record raw flags for a client.
    ///
    /// Merges with anything already pending and restarts its settle timer.
    pub fn record(&mut self, client: ClientId, flags: ChangeFlags) {
        self.record_at(client, flags, Instant::now());
    }

    fn record_at(&mut self, client: ClientId, flags: ChangeFlags, now: Instant) {
        self.pending
            .entry(client)
            .and_modify(|p| {
                p.flags |= flags;
                p.last_seen = now;
            })
            .or_insert(Pending {
                flags,
                first_seen: now,
                last_seen: now,
            });
    }

    /// Forget a client, e.g. after it deregistered.
    pub fn remove(&mut self, client: ClientId) {
        self.pending.remove(&client);
    }

    /// Time left until the earliest pending burst settles.
    ///
    /// `None` when nothing is pending.
    pub fn next_deadline(&self) -> Option<Duration> {
        let now = Instant::now();
        self.pending
            .values()
            .map(|p| self.release_at(p).saturating_duration_since(now))
            .min()
    }

    /// Take every client whose burst has settled.
    ///
    /// Returned in order of each burst's first event.
    pub fn take_ready(&mut self) -> Vec<(ClientId, ChangeFlags)> {
        self.take_ready_at(Instant::now())
    }

    fn take_ready_at(&mut self, now: Instant) -> Vec<(ClientId, ChangeFlags)> {
        let mut ready = Vec::new();

        for (client, p) in &self.pending {
            if now >= self.release_at(p) {
                ready.push((p.first_seen, *client, p.flags));
            }
        }
        for (_, client, _) in &ready {
            self.pending.remove(client);
        }

        ready.sort_by_key(|(first_seen, client, _)| (*first_seen, *client));
        ready
            .into_iter()
            .map(|(_, client, flags)| (client, flags))
            .collect()
    }

    #[cfg(test)]
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    #[cfg(test)]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
