//! Common types shared across the cmsync crates.
//!
//! This crate holds the handle model (identifiers, plugin bindings, composite
//! state) and the workspace-wide error type, so that every component speaks
//! about handles in the same terms.

pub mod error;
pub mod handle;
pub mod types;

pub use error::{Error, Result};
pub use handle::{
    CmHandleState, CompositeState, DataStoreSyncState, DataStores, Handle, LockReason,
    LockReasonCategory, OperationalDataStore, PluginBindings,
};
pub use types::{HandleId, ModuleReference};

/// Dataspace holding the handle registry and its schema-set bookkeeping.
pub const NCMP_DATASPACE_NAME: &str = "NCMP-Admin";

/// Dataspace holding per-handle schema sets, anchors and operational data.
pub const NFP_OPERATIONAL_DATASTORE_DATASPACE_NAME: &str = "NFP-Operational";
