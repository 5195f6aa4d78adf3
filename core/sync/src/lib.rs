//! cmsync Sync Engine
//!
//! This crate drives handles through their lifecycle, including:
//! - Module sync of ADVISED handles into shared or per-handle schema sets
//! - Module-set upgrades requested through the lock reason
//! - Retry bookkeeping with exponential backoff, encoded in lock reasons
//! - Operational data sync of READY handles
//! - Work distribution across instances through claims and a shared queue

pub mod data_sync;
pub mod engine;
pub mod lcm;
pub mod module_sync;
pub mod retry;
pub mod scheduler;
pub mod tasks;
pub mod watchdog;

// Re-export main types
pub use data_sync::{DataSyncProgress, DataSyncWatchdog};
pub use engine::{SyncConfig, SyncEngine, SyncStores};
pub use lcm::{
    CmHandleStateUpdater, LcmEventsPublisher, MemoryLcmPublisher, StateTransition, StateUpdate,
    TracingLcmPublisher,
};
pub use module_sync::ModuleSyncService;
pub use retry::RetryRecord;
pub use scheduler::WatchdogScheduler;
pub use tasks::ModuleSyncTasks;
pub use watchdog::ModuleSyncWatchdog;
