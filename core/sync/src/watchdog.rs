//! Periodic module sync across cooperating instances.
//!
//! Instances share one work queue of ADVISED handle ids. Refilling it is
//! guarded by a cluster lock so only one instance queries the registry per
//! round; each id is then claimed before processing so no two instances sync
//! the same handle.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use cmsync_common::{CmHandleState, HandleId, LockReasonCategory, Result};
use cmsync_storage::{ClusterLock, InventoryStore, TtlMap, WorkQueue};

use crate::engine::SyncConfig;
use crate::retry;
use crate::tasks::ModuleSyncTasks;

/// Name of the lock guarding work-queue refills.
pub const WORK_QUEUE_LOCK: &str = "moduleSyncWorkQueue";

/// Value stored in the work-claim map for a claimed handle.
pub const CLAIM_STARTED: &str = "Started";

/// Drives module sync of ADVISED handles and recovery of failed ones.
#[derive(Clone)]
pub struct ModuleSyncWatchdog {
    inventory: Arc<dyn InventoryStore>,
    queue: Arc<dyn WorkQueue>,
    lock: Arc<dyn ClusterLock>,
    claims: Arc<dyn TtlMap<String>>,
    tasks: ModuleSyncTasks,
    config: SyncConfig,
}

impl ModuleSyncWatchdog {
    pub fn new(
        inventory: Arc<dyn InventoryStore>,
        queue: Arc<dyn WorkQueue>,
        lock: Arc<dyn ClusterLock>,
        claims: Arc<dyn TtlMap<String>>,
        tasks: ModuleSyncTasks,
        config: SyncConfig,
    ) -> Self {
        Self {
            inventory,
            queue,
            lock,
            claims,
            tasks,
            config,
        }
    }

    /// One watchdog round: refill the queue if needed, then drain it batch by batch.
    ///
    /// Returns the number of handles this instance processed.
    pub async fn module_sync_advised_handles(&self) -> Result<usize> {
        self.populate_work_queue_if_needed().await?;

        let mut processed = 0;
        while !self.queue.is_empty().await? {
            let batch = self.queue.drain_to(self.config.module_sync_batch_size).await?;
            let claimed = self.claim(batch).await;
            if claimed.is_empty() {
                continue;
            }
            processed += claimed.len();
            debug!("Processing module sync batch of {} handles", claimed.len());
            self.tasks.perform_module_sync(claimed).await?;
        }
        if processed > 0 {
            info!("Module sync round processed {} handles", processed);
        }
        Ok(processed)
    }

    /// Lock a READY handle for an upgrade; picked up by a later round.
    pub async fn request_module_upgrade(&self, id: &HandleId, target_tag: &str) -> Result<()> {
        self.tasks.request_module_upgrade(id, target_tag).await
    }

    async fn populate_work_queue_if_needed(&self) -> Result<()> {
        if !self.queue.is_empty().await? {
            return Ok(());
        }
        if !self
            .lock
            .try_lock(WORK_QUEUE_LOCK, self.config.work_queue_lock_lease())
            .await?
        {
            debug!("Another instance is populating the work queue");
            return Ok(());
        }

        let result = self.populate_work_queue().await;
        if let Err(e) = self.lock.unlock(WORK_QUEUE_LOCK).await {
            error!("Failed to release work queue lock: {}", e);
        }
        result
    }

    async fn populate_work_queue(&self) -> Result<()> {
        let advised = self
            .inventory
            .query_ids_by_state(CmHandleState::Advised)
            .await?;
        if advised.is_empty() {
            return self.reset_handles_due_for_retry().await;
        }

        debug!("Queueing {} advised handles", advised.len());
        for id in advised {
            if !self.queue.offer(id.clone()).await? {
                warn!("Work queue is full, {} waits for the next round", id);
                break;
            }
        }
        Ok(())
    }

    async fn reset_handles_due_for_retry(&self) -> Result<()> {
        let now = Utc::now();
        let due: Vec<_> = self
            .inventory
            .query_by_lock_reason_categories(&LockReasonCategory::SCHEMA_RELATED)
            .await?
            .into_iter()
            .filter(|handle| handle.state() == CmHandleState::Locked)
            .filter(|handle| {
                handle
                    .composite_state
                    .lock_reason
                    .as_ref()
                    .map(|reason| {
                        retry::is_retry_due(reason, handle.composite_state.last_update_time, now)
                    })
                    .unwrap_or(false)
            })
            .collect();
        if due.is_empty() {
            return Ok(());
        }
        info!("Resetting {} locked handles due for retry", due.len());
        self.tasks.reset_failed_handles(due).await
    }

    async fn claim(&self, batch: Vec<HandleId>) -> Vec<HandleId> {
        let mut claimed = Vec::with_capacity(batch.len());
        for id in batch {
            match self
                .claims
                .put_if_absent(
                    id.as_str(),
                    CLAIM_STARTED.to_string(),
                    self.config.module_sync_claim_ttl(),
                )
                .await
            {
                Ok(None) => claimed.push(id),
                Ok(Some(_)) => debug!("Handle {} already claimed", id),
                Err(e) => warn!("Failed to claim {}: {}", id, e),
            }
        }
        claimed
    }
}
