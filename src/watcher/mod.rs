//! Path change notification.
//!
//! Observers register a path (which need not exist yet) and get called back
//! when it is created, written, deleted, renamed or has its attributes
//! changed.
//!
//! # Architecture
//!
//! ```text
//!  master thread                          watcher thread
//!  -------------                          --------------
//!  Watch ──add/remove──> Coordinator ──Command──> server loop
//!                         (client table)          - ChangeQueue (notify)
//!                                                 - Coalescer
//!  callback <──pump── Coordinator <────Event───── - resolve()
//! ```
//!
//! The watcher thread arms one native watch per registration, on the path
//! itself or on its nearest existing ancestor, and turns raw native flags
//! into the logical change the observer cares about.

mod coalesce;
mod coordinator;
mod error;
mod flags;
mod handle;
mod paths;
mod protocol;
mod queue;
mod resolve;
mod server;

pub use coordinator::{Coordinator, CoordinatorBuilder, PumpStatus, ReadySink};
pub use error::WatchError;
pub use flags::ChangeFlags;
pub use handle::{Watch, WatchCallback};
pub use paths::{FileId, OsPaths, PathOps, existing_parent, same_identity};
pub use protocol::{ClientId, Command, Event};
pub use resolve::{Delivery, Resolution, RetryPolicy, WatchSnapshot, resolve};
pub use server::WatcherStats;
