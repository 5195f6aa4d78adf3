//! Periodic pull of operational data for READY handles.

use chrono::Utc;
use rand::seq::SliceRandom;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use cmsync_common::{
    CmHandleState, DataStoreSyncState, HandleId, OperationalDataStore, Result,
    NFP_OPERATIONAL_DATASTORE_DATASPACE_NAME,
};
use cmsync_dispatch::{DataOperations, ResourceAddress, PASSTHROUGH_OPERATIONAL};
use cmsync_storage::{DataStore, InventoryStore, SchemaStore, TtlMap};

use crate::engine::SyncConfig;

/// Progress of a handle's data sync, as kept in the semaphore map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSyncProgress {
    InProgress,
    Done,
}

/// Copies operational data of unsynchronized READY handles into the data store.
#[derive(Clone)]
pub struct DataSyncWatchdog {
    inventory: Arc<dyn InventoryStore>,
    schema: Arc<dyn SchemaStore>,
    data_store: Arc<dyn DataStore>,
    data: DataOperations,
    semaphores: Arc<dyn TtlMap<DataSyncProgress>>,
    config: SyncConfig,
}

impl DataSyncWatchdog {
    pub fn new(
        inventory: Arc<dyn InventoryStore>,
        schema: Arc<dyn SchemaStore>,
        data_store: Arc<dyn DataStore>,
        data: DataOperations,
        semaphores: Arc<dyn TtlMap<DataSyncProgress>>,
        config: SyncConfig,
    ) -> Self {
        Self {
            inventory,
            schema,
            data_store,
            data,
            semaphores,
            config,
        }
    }

    /// One watchdog round. Returns the number of handles synchronized.
    ///
    /// Candidates are visited in random order so that instances running at
    /// the same time start on different handles. A handle is only synced by
    /// the instance that wins its semaphore, and only if it is still READY
    /// and unsynchronized once the semaphore is held. Failures are logged
    /// and the round moves on.
    pub async fn execute_data_sync(&self) -> Result<usize> {
        let mut candidates: Vec<HandleId> = self
            .inventory
            .query_by_operational_sync_state(DataStoreSyncState::Unsynchronized)
            .await?
            .into_iter()
            .filter(|handle| handle.state() == CmHandleState::Ready)
            .map(|handle| handle.id)
            .collect();
        candidates.shuffle(&mut rand::rng());

        let mut synced = 0;
        for id in candidates {
            match self
                .semaphores
                .put_if_absent(
                    id.as_str(),
                    DataSyncProgress::InProgress,
                    self.config.data_sync_semaphore_ttl(),
                )
                .await
            {
                Ok(None) => {}
                Ok(Some(_)) => {
                    debug!("Data sync of {} is held by another instance", id);
                    continue;
                }
                Err(e) => {
                    warn!("Failed to take data sync semaphore of {}: {}", id, e);
                    continue;
                }
            }

            match self.sync_handle(&id).await {
                Ok(true) => synced += 1,
                Ok(false) => {}
                Err(e) => error!("Data sync of {} failed: {}", id, e),
            }
        }
        if synced > 0 {
            info!("Data sync round synchronized {} handles", synced);
        }
        Ok(synced)
    }

    /// Sync one handle whose semaphore is held. Returns false when the
    /// handle no longer needs a sync.
    async fn sync_handle(&self, id: &HandleId) -> Result<bool> {
        let current = self.inventory.get(id).await?;
        if current.state() != CmHandleState::Ready
            || current.composite_state.operational_sync_state()
                != Some(DataStoreSyncState::Unsynchronized)
        {
            debug!("{} changed to {} before its data sync, skipping", id, current.state());
            self.semaphores.remove(id.as_str()).await?;
            return Ok(false);
        }

        let anchor = id.as_str();
        let root_nodes = self
            .schema
            .root_node_references(NFP_OPERATIONAL_DATASTORE_DATASPACE_NAME, anchor)
            .await?;

        for node in root_nodes {
            let address = ResourceAddress::new(PASSTHROUGH_OPERATIONAL, anchor, node.as_str());
            let data = match self.data.fetch_resource_data(&address, None, None, None).await {
                Ok(data) => data,
                Err(e) => {
                    warn!("Failed to read {} of {}: {}", node, anchor, e);
                    continue;
                }
            };
            if let Err(e) = self
                .data_store
                .save_data(NFP_OPERATIONAL_DATASTORE_DATASPACE_NAME, anchor, &node, data)
                .await
            {
                warn!("Failed to save {} of {}: {}", node, anchor, e);
            }
        }

        self.inventory
            .update_operational_data_store(
                id,
                OperationalDataStore {
                    sync_state: DataStoreSyncState::Synchronized,
                    last_sync_time: Some(Utc::now()),
                },
            )
            .await?;
        self.semaphores
            .replace(anchor, DataSyncProgress::Done)
            .await?;
        debug!("Operational data of {} synchronized", anchor);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmsync_common::{Handle, LockReason, LockReasonCategory, ModuleReference, PluginBindings};
    use cmsync_dispatch::{
        DispatchConfig, MemoryEventPublisher, MemoryTransport, PluginRequest, PluginTransport,
    };
    use cmsync_storage::{MemoryDataStore, MemoryInventoryStore, MemorySchemaStore, MemoryTtlMap};
    use serde_json::json;
    use std::collections::HashMap;
    use std::time::Duration;

    const NFP: &str = NFP_OPERATIONAL_DATASTORE_DATASPACE_NAME;
    const DATA_TARGET: &str = "dmi-1/ch/ch-1/data/ds/ncmp-datastore:passthrough-operational";

    struct Fixture {
        inventory: MemoryInventoryStore,
        data_store: MemoryDataStore,
        transport: MemoryTransport,
        semaphores: MemoryTtlMap<DataSyncProgress>,
        watchdog: DataSyncWatchdog,
    }

    async fn fixture(handles: Vec<Handle>) -> Fixture {
        let inventory = MemoryInventoryStore::with_handles(handles);
        let schema = MemorySchemaStore::new();
        schema
            .create_schema_set(
                NFP,
                "ch-1",
                HashMap::new(),
                vec![ModuleReference::new("m1", "r1"), ModuleReference::new("m2", "r1")],
            )
            .await
            .unwrap();
        schema.create_anchor(NFP, "ch-1", "ch-1").await.unwrap();

        let data_store = MemoryDataStore::new();
        let transport = MemoryTransport::new();
        let semaphores = MemoryTtlMap::new();
        let data = DataOperations::new(
            Arc::new(inventory.clone()),
            Arc::new(transport.clone()),
            Arc::new(MemoryEventPublisher::new()),
            DispatchConfig::default(),
        );
        let watchdog = DataSyncWatchdog::new(
            Arc::new(inventory.clone()),
            Arc::new(schema),
            Arc::new(data_store.clone()),
            data,
            Arc::new(semaphores.clone()),
            SyncConfig::default(),
        );
        Fixture {
            inventory,
            data_store,
            transport,
            semaphores,
            watchdog,
        }
    }

    fn ready(id: &str) -> Handle {
        let mut handle = Handle::advised(HandleId::new(id).unwrap(), PluginBindings::common("dmi-1"));
        handle
            .composite_state
            .transition_to(CmHandleState::Ready, Utc::now());
        handle
    }

    async fn sync_state(f: &Fixture, id: &str) -> Option<DataStoreSyncState> {
        f.inventory
            .get(&HandleId::new(id).unwrap())
            .await
            .unwrap()
            .composite_state
            .operational_sync_state()
    }

    #[tokio::test]
    async fn test_root_nodes_are_pulled_and_saved() {
        let f = fixture(vec![ready("ch-1")]).await;
        f.transport.route(DATA_TARGET, json!({"leaf": 1})).await;

        assert_eq!(f.watchdog.execute_data_sync().await.unwrap(), 1);

        assert_eq!(f.transport.call_count(DATA_TARGET).await, 2);
        for node in ["m1", "m2"] {
            assert_eq!(
                f.data_store.get_data(NFP, "ch-1", node).await.unwrap(),
                Some(json!({"leaf": 1}))
            );
        }
        assert_eq!(
            sync_state(&f, "ch-1").await,
            Some(DataStoreSyncState::Synchronized)
        );
        assert_eq!(
            f.semaphores.get("ch-1").await.unwrap(),
            Some(DataSyncProgress::Done)
        );

        // Synchronized handles are not picked up again.
        assert_eq!(f.watchdog.execute_data_sync().await.unwrap(), 0);
        assert_eq!(f.transport.call_count(DATA_TARGET).await, 2);
    }

    #[tokio::test]
    async fn test_node_failures_do_not_block_the_handle() {
        let f = fixture(vec![ready("ch-1")]).await;
        f.transport.set_unreachable("dmi-1", true).await;

        assert_eq!(f.watchdog.execute_data_sync().await.unwrap(), 1);
        assert!(f.data_store.get_data(NFP, "ch-1", "m1").await.unwrap().is_none());
        assert_eq!(
            sync_state(&f, "ch-1").await,
            Some(DataStoreSyncState::Synchronized)
        );
    }

    #[tokio::test]
    async fn test_failed_node_does_not_drop_the_others() {
        let f = fixture(vec![ready("ch-1")]).await;
        f.transport.route(DATA_TARGET, json!({"leaf": 1})).await;
        f.transport.reject_query("resourceIdentifier", "m2").await;

        assert_eq!(f.watchdog.execute_data_sync().await.unwrap(), 1);
        assert_eq!(
            f.data_store.get_data(NFP, "ch-1", "m1").await.unwrap(),
            Some(json!({"leaf": 1}))
        );
        assert!(f.data_store.get_data(NFP, "ch-1", "m2").await.unwrap().is_none());
        assert_eq!(
            sync_state(&f, "ch-1").await,
            Some(DataStoreSyncState::Synchronized)
        );
    }

    #[tokio::test]
    async fn test_handle_locked_before_its_turn_is_left_alone() {
        let f = fixture(vec![ready("ch-1")]).await;
        f.transport.route(DATA_TARGET, json!({"leaf": 1})).await;
        let candidates = f
            .inventory
            .query_by_operational_sync_state(DataStoreSyncState::Unsynchronized)
            .await
            .unwrap();
        assert_eq!(candidates.len(), 1);

        // Upgrade requested after the candidate query, before the pull.
        let mut state = candidates[0].composite_state.clone();
        state.lock_reason = Some(LockReason::new(
            LockReasonCategory::ModuleUpgrade,
            "Upgrade to ModuleSetTag: tag-b",
        ));
        state.transition_to(CmHandleState::Locked, Utc::now());
        f.inventory
            .save_composite_states(vec![(HandleId::new("ch-1").unwrap(), state)])
            .await
            .unwrap();
        assert!(f
            .semaphores
            .put_if_absent("ch-1", DataSyncProgress::InProgress, Duration::from_secs(1800))
            .await
            .unwrap()
            .is_none());

        assert!(!f.watchdog.sync_handle(&HandleId::new("ch-1").unwrap()).await.unwrap());
        let stored = f.inventory.get(&HandleId::new("ch-1").unwrap()).await.unwrap();
        assert_eq!(stored.state(), CmHandleState::Locked);
        assert_eq!(
            stored.composite_state.lock_reason.map(|reason| reason.category),
            Some(LockReasonCategory::ModuleUpgrade)
        );
        assert!(f.transport.calls().await.is_empty());
        assert_eq!(f.semaphores.get("ch-1").await.unwrap(), None);
    }

    /// Transport that locks its handle for an upgrade while serving the pull.
    struct UpgradingTransport {
        inner: MemoryTransport,
        inventory: MemoryInventoryStore,
    }

    #[async_trait::async_trait]
    impl PluginTransport for UpgradingTransport {
        async fn post(&self, request: PluginRequest) -> Result<serde_json::Value> {
            let id = HandleId::new(request.path[1].clone())?;
            let mut handle = self.inventory.get(&id).await?;
            if handle.state() == CmHandleState::Ready {
                handle.composite_state.lock_reason = Some(LockReason::new(
                    LockReasonCategory::ModuleUpgrade,
                    "Upgrade to ModuleSetTag: tag-b",
                ));
                handle
                    .composite_state
                    .transition_to(CmHandleState::Locked, Utc::now());
                self.inventory.save(handle).await?;
            }
            self.inner.post(request).await
        }
    }

    #[tokio::test]
    async fn test_lock_during_pull_is_kept() {
        let f = fixture(vec![ready("ch-1")]).await;
        f.transport.route(DATA_TARGET, json!({"leaf": 1})).await;
        let data = DataOperations::new(
            Arc::new(f.inventory.clone()),
            Arc::new(UpgradingTransport {
                inner: f.transport.clone(),
                inventory: f.inventory.clone(),
            }),
            Arc::new(MemoryEventPublisher::new()),
            DispatchConfig::default(),
        );
        let watchdog = DataSyncWatchdog {
            data,
            ..f.watchdog.clone()
        };

        assert_eq!(watchdog.execute_data_sync().await.unwrap(), 1);

        let stored = f.inventory.get(&HandleId::new("ch-1").unwrap()).await.unwrap();
        assert_eq!(stored.state(), CmHandleState::Locked);
        assert_eq!(
            stored.composite_state.lock_reason.map(|reason| reason.category),
            Some(LockReasonCategory::ModuleUpgrade)
        );
    }

    #[tokio::test]
    async fn test_held_semaphore_skips_handle() {
        let f = fixture(vec![ready("ch-1")]).await;
        f.semaphores
            .put_if_absent("ch-1", DataSyncProgress::InProgress, Duration::from_secs(1800))
            .await
            .unwrap();

        assert_eq!(f.watchdog.execute_data_sync().await.unwrap(), 0);
        assert!(f.transport.calls().await.is_empty());
        assert_eq!(
            sync_state(&f, "ch-1").await,
            Some(DataStoreSyncState::Unsynchronized)
        );
    }

    #[tokio::test]
    async fn test_missing_anchor_is_logged_and_skipped() {
        let f = fixture(vec![ready("ch-2")]).await;

        assert_eq!(f.watchdog.execute_data_sync().await.unwrap(), 0);
        assert_eq!(
            sync_state(&f, "ch-2").await,
            Some(DataStoreSyncState::Unsynchronized)
        );
        assert_eq!(
            f.semaphores.get("ch-2").await.unwrap(),
            Some(DataSyncProgress::InProgress)
        );
    }

    #[tokio::test]
    async fn test_data_sync_disabled_is_ignored() {
        let mut handle = Handle::advised(HandleId::new("ch-1").unwrap(), PluginBindings::common("dmi-1"));
        handle.composite_state.data_sync_enabled = false;
        handle
            .composite_state
            .transition_to(CmHandleState::Ready, Utc::now());
        let f = fixture(vec![handle]).await;

        assert_eq!(f.watchdog.execute_data_sync().await.unwrap(), 0);
        assert_eq!(
            sync_state(&f, "ch-1").await,
            Some(DataStoreSyncState::NoneRequested)
        );
    }
}
