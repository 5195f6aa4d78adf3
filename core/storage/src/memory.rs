//! In-memory store and cluster implementations.
//!
//! Useful for single-node deployments and testing. All data is held in
//! process memory and lost on drop.

mod cluster;
mod inventory;
mod schema;

pub use cluster::{MemoryClusterLock, MemoryTtlMap, MemoryWorkQueue};
pub use inventory::MemoryInventoryStore;
pub use schema::{MemoryDataStore, MemorySchemaStore};
