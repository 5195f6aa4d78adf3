//! Store and cluster abstractions consumed by the cmsync core.
//!
//! The handle registry, the schema/anchor store, the operational data store
//! and the distributed primitives (lock, work queue, TTL maps) are external
//! collaborators. This crate defines them as traits and provides in-memory
//! implementations for single-node deployments and tests.
//!
//! # Design Principles
//! - Store isolation: no backend-specific logic in the sync or dispatch crates
//! - Async operations: every call may cross the network in a real deployment
//! - Re-fetch over caching: callers pass ids and read current state

pub mod cluster;
pub mod inventory;
pub mod memory;
pub mod schema;

pub use cluster::{ClusterLock, TtlMap, WorkQueue};
pub use inventory::InventoryStore;
pub use memory::{
    MemoryClusterLock, MemoryDataStore, MemoryInventoryStore, MemorySchemaStore, MemoryTtlMap,
    MemoryWorkQueue,
};
pub use schema::{DataStore, SchemaStore};
