//! In-memory handle registry.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use cmsync_common::{
    CmHandleState, CompositeState, DataStoreSyncState, Error, Handle, HandleId,
    LockReasonCategory, OperationalDataStore, Result,
};

use crate::inventory::InventoryStore;

/// In-memory handle registry.
///
/// Query results are ordered by handle id.
#[derive(Clone, Default)]
pub struct MemoryInventoryStore {
    handles: Arc<RwLock<HashMap<HandleId, Handle>>>,
}

impl MemoryInventoryStore {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry pre-populated with handles.
    pub fn with_handles(handles: impl IntoIterator<Item = Handle>) -> Self {
        let map = handles
            .into_iter()
            .map(|handle| (handle.id.clone(), handle))
            .collect();
        Self {
            handles: Arc::new(RwLock::new(map)),
        }
    }

    /// Remove a handle (deregistration).
    pub async fn remove(&self, id: &HandleId) -> Option<Handle> {
        self.handles.write().await.remove(id)
    }

    pub async fn len(&self) -> usize {
        self.handles.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.handles.read().await.is_empty()
    }

    async fn filtered<F>(&self, predicate: F) -> Vec<Handle>
    where
        F: Fn(&Handle) -> bool,
    {
        let handles = self.handles.read().await;
        let mut matching: Vec<Handle> = handles
            .values()
            .filter(|handle| predicate(handle))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.id.cmp(&b.id));
        matching
    }
}

#[async_trait]
impl InventoryStore for MemoryInventoryStore {
    async fn get(&self, id: &HandleId) -> Result<Handle> {
        self.handles
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Handle not found: {}", id)))
    }

    async fn get_by_references(&self, references: &[String]) -> Result<Vec<Handle>> {
        Ok(self
            .filtered(|handle| {
                references
                    .iter()
                    .any(|reference| handle.is_referenced_by(reference))
            })
            .await)
    }

    async fn query_ids_by_state(&self, state: CmHandleState) -> Result<Vec<HandleId>> {
        Ok(self
            .filtered(|handle| handle.state() == state)
            .await
            .into_iter()
            .map(|handle| handle.id)
            .collect())
    }

    async fn query_by_lock_reason_categories(
        &self,
        categories: &[LockReasonCategory],
    ) -> Result<Vec<Handle>> {
        Ok(self
            .filtered(|handle| {
                handle
                    .composite_state
                    .lock_category()
                    .map(|category| categories.contains(&category))
                    .unwrap_or(false)
            })
            .await)
    }

    async fn query_by_operational_sync_state(
        &self,
        sync_state: DataStoreSyncState,
    ) -> Result<Vec<Handle>> {
        Ok(self
            .filtered(|handle| handle.composite_state.operational_sync_state() == Some(sync_state))
            .await)
    }

    async fn query_ids_by_module_set_tag(
        &self,
        module_set_tag: &str,
        state: CmHandleState,
    ) -> Result<Vec<HandleId>> {
        Ok(self
            .filtered(|handle| handle.module_set_tag == module_set_tag && handle.state() == state)
            .await
            .into_iter()
            .map(|handle| handle.id)
            .collect())
    }

    async fn save(&self, handle: Handle) -> Result<()> {
        self.handles.write().await.insert(handle.id.clone(), handle);
        Ok(())
    }

    async fn save_composite_states(&self, states: Vec<(HandleId, CompositeState)>) -> Result<()> {
        let mut handles = self.handles.write().await;
        if let Some((missing, _)) = states.iter().find(|(id, _)| !handles.contains_key(id)) {
            return Err(Error::NotFound(format!("Handle not found: {}", missing)));
        }
        for (id, state) in states {
            if let Some(handle) = handles.get_mut(&id) {
                handle.composite_state = state;
            }
        }
        Ok(())
    }

    async fn update_module_set_tag(&self, id: &HandleId, module_set_tag: &str) -> Result<()> {
        let mut handles = self.handles.write().await;
        let handle = handles
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("Handle not found: {}", id)))?;
        handle.module_set_tag = module_set_tag.to_string();
        Ok(())
    }

    async fn update_operational_data_store(
        &self,
        id: &HandleId,
        operational: OperationalDataStore,
    ) -> Result<()> {
        let mut handles = self.handles.write().await;
        let handle = handles
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("Handle not found: {}", id)))?;
        handle.composite_state.data_stores.operational = Some(operational);
        Ok(())
    }
}
