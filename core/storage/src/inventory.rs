//! Handle registry accessor.

use async_trait::async_trait;

use cmsync_common::{
    CmHandleState, CompositeState, DataStoreSyncState, Handle, HandleId, LockReasonCategory,
    OperationalDataStore, Result,
};

/// Read/write access to persisted handle records.
///
/// The store does not enforce work ownership: callers must hold the work
/// claim (module sync) or semaphore (data sync) of a handle before mutating
/// its composite state.
#[async_trait]
pub trait InventoryStore: Send + Sync {
    /// Get a handle by id.
    ///
    /// # Errors
    /// - `NotFound` if no handle has this id
    async fn get(&self, id: &HandleId) -> Result<Handle>;

    /// Get all handles named by id or alternate id; unknown references are skipped.
    async fn get_by_references(&self, references: &[String]) -> Result<Vec<Handle>>;

    /// Ids of all handles in the given lifecycle state.
    async fn query_ids_by_state(&self, state: CmHandleState) -> Result<Vec<HandleId>>;

    /// Handles whose lock reason category is one of `categories`.
    async fn query_by_lock_reason_categories(
        &self,
        categories: &[LockReasonCategory],
    ) -> Result<Vec<Handle>>;

    /// Handles whose operational datastore has the given sync state.
    async fn query_by_operational_sync_state(
        &self,
        sync_state: DataStoreSyncState,
    ) -> Result<Vec<Handle>>;

    /// Ids of handles with the given module-set tag and lifecycle state.
    async fn query_ids_by_module_set_tag(
        &self,
        module_set_tag: &str,
        state: CmHandleState,
    ) -> Result<Vec<HandleId>>;

    /// Insert or replace a handle record.
    async fn save(&self, handle: Handle) -> Result<()>;

    /// Replace the composite state of several handles.
    ///
    /// # Errors
    /// - `NotFound` if any id is unknown; no state is written in that case
    async fn save_composite_states(&self, states: Vec<(HandleId, CompositeState)>) -> Result<()>;

    /// Persist a new module-set tag onto a handle.
    async fn update_module_set_tag(&self, id: &HandleId, module_set_tag: &str) -> Result<()>;

    /// Replace only the operational datastore record of a handle, leaving
    /// its lifecycle state and lock reason as currently stored.
    ///
    /// # Errors
    /// - `NotFound` if no handle has this id
    async fn update_operational_data_store(
        &self,
        id: &HandleId,
        operational: OperationalDataStore,
    ) -> Result<()>;
}
