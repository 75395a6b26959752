pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;

pub use adapters::memory_store::MemoryStore;
pub use adapters::sinks::{ChannelSink, DedupSink, TracingSink};
pub use config::LibraryConfig;
pub use crate::core::coordinator::TransactionCoordinator;
pub use crate::core::shutdown::{Shutdown, ShutdownSignal};
pub use crate::core::watcher::{ChangeFeedWatcher, WatchOutcome, WatchPositions, WatcherHandles};
pub use utils::error::{BorrowError, LibraryError, Result, StoreError};
