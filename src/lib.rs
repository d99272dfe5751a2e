pub mod config;
pub mod logging;
pub mod watcher;

pub use config::{LoggingConfig, Settings, WatcherConfig};
pub use watcher::{
    ChangeFlags, ClientId, Coordinator, CoordinatorBuilder, PumpStatus, ReadySink, Watch,
    WatchCallback, WatchError, WatcherStats,
};
