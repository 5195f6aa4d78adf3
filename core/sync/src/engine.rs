//! Wiring of the watchdogs, the request handler and their configuration.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use cmsync_dispatch::{
    DataOperationEventPublisher, DataOperations, DispatchConfig, ModelOperations, PluginTransport,
    RequestHandler,
};
use cmsync_storage::{
    ClusterLock, DataStore, InventoryStore, MemoryClusterLock, MemoryDataStore,
    MemoryInventoryStore, MemorySchemaStore, MemoryTtlMap, MemoryWorkQueue, SchemaStore, TtlMap,
    WorkQueue,
};

use crate::data_sync::{DataSyncProgress, DataSyncWatchdog};
use crate::lcm::{CmHandleStateUpdater, LcmEventsPublisher};
use crate::module_sync::ModuleSyncService;
use crate::scheduler::WatchdogScheduler;
use crate::tasks::ModuleSyncTasks;
use crate::watchdog::ModuleSyncWatchdog;

/// Configuration for the sync watchdogs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Delay between module sync rounds.
    pub module_sync_interval_ms: u64,
    /// Delay between data sync rounds.
    pub data_sync_interval_ms: u64,
    /// Ids drained from the work queue per batch.
    pub module_sync_batch_size: usize,
    /// Lifetime of a module sync work claim.
    pub module_sync_claim_ttl_secs: u64,
    /// Lifetime of a data sync semaphore entry.
    pub data_sync_semaphore_ttl_secs: u64,
    /// Lease of the work-queue refill lock.
    pub work_queue_lock_lease_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            module_sync_interval_ms: 5_000,
            data_sync_interval_ms: 30_000,
            module_sync_batch_size: 300,
            module_sync_claim_ttl_secs: 600,
            data_sync_semaphore_ttl_secs: 1_800,
            work_queue_lock_lease_ms: 30_000,
        }
    }
}

impl SyncConfig {
    pub fn module_sync_interval(&self) -> Duration {
        Duration::from_millis(self.module_sync_interval_ms)
    }

    pub fn data_sync_interval(&self) -> Duration {
        Duration::from_millis(self.data_sync_interval_ms)
    }

    pub fn module_sync_claim_ttl(&self) -> Duration {
        Duration::from_secs(self.module_sync_claim_ttl_secs)
    }

    pub fn data_sync_semaphore_ttl(&self) -> Duration {
        Duration::from_secs(self.data_sync_semaphore_ttl_secs)
    }

    pub fn work_queue_lock_lease(&self) -> Duration {
        Duration::from_millis(self.work_queue_lock_lease_ms)
    }
}

/// Stores and cluster primitives the engine runs against.
#[derive(Clone)]
pub struct SyncStores {
    pub inventory: Arc<dyn InventoryStore>,
    pub schema: Arc<dyn SchemaStore>,
    pub data: Arc<dyn DataStore>,
    pub queue: Arc<dyn WorkQueue>,
    pub lock: Arc<dyn ClusterLock>,
    pub claims: Arc<dyn TtlMap<String>>,
    pub semaphores: Arc<dyn TtlMap<DataSyncProgress>>,
}

impl SyncStores {
    /// In-memory stores for a single instance.
    pub fn in_memory(inventory: MemoryInventoryStore) -> Self {
        Self {
            inventory: Arc::new(inventory),
            schema: Arc::new(MemorySchemaStore::new()),
            data: Arc::new(MemoryDataStore::new()),
            queue: Arc::new(MemoryWorkQueue::new()),
            lock: Arc::new(MemoryClusterLock::new()),
            claims: Arc::new(MemoryTtlMap::<String>::new()),
            semaphores: Arc::new(MemoryTtlMap::<DataSyncProgress>::new()),
        }
    }
}

/// Main sync engine: both watchdogs plus the data request entry point.
pub struct SyncEngine {
    module_sync: ModuleSyncWatchdog,
    data_sync: DataSyncWatchdog,
    requests: RequestHandler,
    config: SyncConfig,
}

impl SyncEngine {
    pub fn new(
        stores: SyncStores,
        transport: Arc<dyn PluginTransport>,
        lcm_publisher: Arc<dyn LcmEventsPublisher>,
        client_publisher: Arc<dyn DataOperationEventPublisher>,
        config: SyncConfig,
        dispatch_config: DispatchConfig,
    ) -> Self {
        let module_sync_service = ModuleSyncService::new(
            stores.inventory.clone(),
            stores.schema.clone(),
            ModelOperations::new(transport.clone()),
        );
        let updater = CmHandleStateUpdater::new(stores.inventory.clone(), lcm_publisher);
        let tasks = ModuleSyncTasks::new(
            stores.inventory.clone(),
            module_sync_service,
            updater,
            stores.claims.clone(),
        );
        let module_sync = ModuleSyncWatchdog::new(
            stores.inventory.clone(),
            stores.queue,
            stores.lock,
            stores.claims,
            tasks,
            config.clone(),
        );

        let data = DataOperations::new(
            stores.inventory.clone(),
            transport,
            client_publisher,
            dispatch_config.clone(),
        );
        let data_sync = DataSyncWatchdog::new(
            stores.inventory,
            stores.schema,
            stores.data,
            data.clone(),
            stores.semaphores,
            config.clone(),
        );

        Self {
            module_sync,
            data_sync,
            requests: RequestHandler::new(data, dispatch_config),
            config,
        }
    }

    pub fn module_sync_watchdog(&self) -> &ModuleSyncWatchdog {
        &self.module_sync
    }

    pub fn data_sync_watchdog(&self) -> &DataSyncWatchdog {
        &self.data_sync
    }

    pub fn requests(&self) -> &RequestHandler {
        &self.requests
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Start both watchdog loops.
    pub fn start(&self) -> WatchdogScheduler {
        let mut scheduler = WatchdogScheduler::new();

        let module_sync = self.module_sync.clone();
        scheduler.schedule("module-sync", self.config.module_sync_interval(), move || {
            let module_sync = module_sync.clone();
            async move { module_sync.module_sync_advised_handles().await }
        });

        let data_sync = self.data_sync.clone();
        scheduler.schedule("data-sync", self.config.data_sync_interval(), move || {
            let data_sync = data_sync.clone();
            async move { data_sync.execute_data_sync().await }
        });

        scheduler
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lcm::MemoryLcmPublisher;
    use cmsync_common::{
        CmHandleState, DataStoreSyncState, Handle, HandleId, LockReasonCategory, PluginBindings,
        NFP_OPERATIONAL_DATASTORE_DATASPACE_NAME,
    };
    use cmsync_dispatch::{
        MemoryEventPublisher, MemoryTransport, RequestOutcome, ResourceAddress,
        PASSTHROUGH_OPERATIONAL,
    };
    use serde_json::json;

    fn handle(id: &str) -> Handle {
        Handle::advised(HandleId::new(id).unwrap(), PluginBindings::common("dmi-1"))
    }

    async fn route_module(transport: &MemoryTransport, id: &str, module: &str) {
        transport
            .route(
                format!("dmi-1/ch/{}/modules", id),
                json!({"schemas": [{"moduleName": module, "revision": "r1"}]}),
            )
            .await;
        transport
            .route(
                format!("dmi-1/ch/{}/moduleResources", id),
                json!([{"moduleName": module, "revision": "r1", "yangSource": "module"}]),
            )
            .await;
    }

    #[test]
    fn test_config_defaults_and_partial_json() {
        let config = SyncConfig::default();
        assert_eq!(config.module_sync_batch_size, 300);
        assert_eq!(config.module_sync_claim_ttl(), Duration::from_secs(600));
        assert_eq!(config.data_sync_semaphore_ttl(), Duration::from_secs(1800));

        let config: SyncConfig = serde_json::from_str(r#"{"module_sync_interval_ms": 100}"#).unwrap();
        assert_eq!(config.module_sync_interval(), Duration::from_millis(100));
        assert_eq!(config.data_sync_interval_ms, 30_000);
    }

    /// ch-1 syncs and reads data, ch-2 fails on an unreachable plugin, ch-3
    /// shares ch-1's module set tag and reuses its schema set.
    #[tokio::test]
    async fn test_end_to_end_scenarios() {
        let mut ch2 = handle("ch-2");
        ch2.plugins = PluginBindings::common("dmi-2");
        let inventory = MemoryInventoryStore::with_handles(vec![
            handle("ch-1").with_module_set_tag("tag-a"),
            ch2,
        ]);
        let transport = MemoryTransport::new();
        route_module(&transport, "ch-1", "m1").await;
        transport.set_unreachable("dmi-2", true).await;
        transport
            .route(
                "dmi-1/ch/ch-1/data/ds/ncmp-datastore:passthrough-operational",
                json!({"m1": {"leaf": 1}}),
            )
            .await;
        let stores = SyncStores::in_memory(inventory.clone());
        let data_store = stores.data.clone();
        let engine = SyncEngine::new(
            stores,
            Arc::new(transport.clone()),
            Arc::new(MemoryLcmPublisher::new()),
            Arc::new(MemoryEventPublisher::new()),
            SyncConfig::default(),
            DispatchConfig::default(),
        );

        engine.module_sync_watchdog().module_sync_advised_handles().await.unwrap();
        let ch1 = inventory.get(&HandleId::new("ch-1").unwrap()).await.unwrap();
        assert_eq!(ch1.state(), CmHandleState::Ready);
        let ch2 = inventory.get(&HandleId::new("ch-2").unwrap()).await.unwrap();
        assert_eq!(ch2.state(), CmHandleState::Locked);
        assert_eq!(
            ch2.composite_state.lock_category(),
            Some(LockReasonCategory::ModuleSyncFailed)
        );

        // Data sync of ch-1, then a synchronous read through the request handler.
        assert_eq!(engine.data_sync_watchdog().execute_data_sync().await.unwrap(), 1);
        assert_eq!(
            data_store
                .get_data(NFP_OPERATIONAL_DATASTORE_DATASPACE_NAME, "ch-1", "m1")
                .await
                .unwrap(),
            Some(json!({"m1": {"leaf": 1}}))
        );
        let ch1 = inventory.get(&HandleId::new("ch-1").unwrap()).await.unwrap();
        assert_eq!(
            ch1.composite_state.operational_sync_state(),
            Some(DataStoreSyncState::Synchronized)
        );
        let outcome = engine
            .requests()
            .execute_request(ResourceAddress::new(PASSTHROUGH_OPERATIONAL, "ch-1", "m1"), None, None)
            .await
            .unwrap();
        assert!(matches!(outcome, RequestOutcome::Data(_)));

        // ch-3 joins with the same tag: no plugin call for its model.
        inventory
            .save(handle("ch-3").with_module_set_tag("tag-a"))
            .await
            .unwrap();
        let calls_before = transport.calls().await.len();
        engine.module_sync_watchdog().module_sync_advised_handles().await.unwrap();
        let ch3 = inventory.get(&HandleId::new("ch-3").unwrap()).await.unwrap();
        assert_eq!(ch3.state(), CmHandleState::Ready);
        assert_eq!(transport.calls().await.len(), calls_before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_started_engine_syncs_in_background() {
        let inventory = MemoryInventoryStore::with_handles(vec![handle("ch-1")]);
        let transport = MemoryTransport::new();
        route_module(&transport, "ch-1", "m1").await;

        let engine = SyncEngine::new(
            SyncStores::in_memory(inventory.clone()),
            Arc::new(transport),
            Arc::new(MemoryLcmPublisher::new()),
            Arc::new(MemoryEventPublisher::new()),
            SyncConfig::default(),
            DispatchConfig::default(),
        );
        let scheduler = engine.start();
        assert_eq!(scheduler.len(), 2);

        tokio::time::sleep(Duration::from_millis(10)).await;
        let ch1 = inventory.get(&HandleId::new("ch-1").unwrap()).await.unwrap();
        assert_eq!(ch1.state(), CmHandleState::Ready);
        scheduler.shutdown().await;
    }
}
