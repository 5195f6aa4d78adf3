//! Batch processing behind the module sync watchdog.

use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, warn};

use cmsync_common::{CmHandleState, Error, Handle, HandleId, LockReasonCategory, Result};
use cmsync_storage::{InventoryStore, TtlMap};

use crate::lcm::{CmHandleStateUpdater, StateTransition, StateUpdate};
use crate::module_sync::ModuleSyncService;
use crate::retry;

/// Runs module sync for claimed batches and resets handles due for a retry.
#[derive(Clone)]
pub struct ModuleSyncTasks {
    inventory: Arc<dyn InventoryStore>,
    module_sync: ModuleSyncService,
    updater: CmHandleStateUpdater,
    claims: Arc<dyn TtlMap<String>>,
}

impl ModuleSyncTasks {
    pub fn new(
        inventory: Arc<dyn InventoryStore>,
        module_sync: ModuleSyncService,
        updater: CmHandleStateUpdater,
        claims: Arc<dyn TtlMap<String>>,
    ) -> Self {
        Self {
            inventory,
            module_sync,
            updater,
            claims,
        }
    }

    /// Synchronize every ADVISED handle of a claimed batch.
    ///
    /// Each handle is re-read first; handles that vanished or left ADVISED
    /// are skipped. A failing or panicking handle ends up LOCKED without
    /// affecting the others. The collected transitions are applied and
    /// published once, whatever happened to individual handles.
    ///
    /// Claims are left in place and expire with their TTL.
    pub async fn perform_module_sync(&self, batch: Vec<HandleId>) -> Result<Vec<StateTransition>> {
        let mut updates = Vec::with_capacity(batch.len());
        for id in batch {
            let handle = match self.inventory.get(&id).await {
                Ok(handle) => handle,
                Err(Error::NotFound(_)) => {
                    debug!("Handle {} no longer exists, skipping", id);
                    continue;
                }
                Err(e) => {
                    warn!("Failed to read handle {}: {}", id, e);
                    continue;
                }
            };
            if handle.state() != CmHandleState::Advised {
                debug!("Handle {} is {}, skipping", id, handle.state());
                continue;
            }
            updates.push(self.sync_handle(handle).await);
        }
        self.updater.update_states(updates).await
    }

    async fn sync_handle(&self, handle: Handle) -> StateUpdate {
        let upgrading = handle.composite_state.in_upgrade_or_upgrade_failed();
        let result = AssertUnwindSafe(self.run_sync(&handle, upgrading))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(Error::Storage(panic_message(panic.as_ref()))));

        match result {
            Ok(()) => StateUpdate::new(handle, CmHandleState::Ready),
            Err(e) => {
                let category = if upgrading {
                    LockReasonCategory::ModuleUpgradeFailed
                } else {
                    LockReasonCategory::ModuleSyncFailed
                };
                warn!("Module sync of {} failed: {}", handle.id, e);
                let lock_reason = retry::next_failure(
                    handle.composite_state.lock_reason.as_ref(),
                    category,
                    &e.to_string(),
                );
                StateUpdate::locked(handle, lock_reason)
            }
        }
    }

    async fn run_sync(&self, handle: &Handle, upgrading: bool) -> Result<()> {
        if upgrading {
            self.module_sync.sync_and_upgrade_schema_set(handle).await
        } else {
            self.module_sync.delete_schema_set_if_exists(&handle.id).await?;
            self.module_sync
                .sync_and_create_schema_set_and_anchor(handle)
                .await
        }
    }

    /// Lock a READY handle for an upgrade to `target_tag`.
    ///
    /// # Errors
    /// - `NotFound` if the handle does not exist
    /// - `StateMismatch` if the handle is not READY
    pub async fn request_module_upgrade(&self, id: &HandleId, target_tag: &str) -> Result<()> {
        let handle = self.inventory.get(id).await?;
        if handle.state() != CmHandleState::Ready {
            return Err(Error::StateMismatch(format!(
                "Handle {} is {}, only READY handles can be upgraded",
                id,
                handle.state()
            )));
        }
        self.updater
            .update_states(vec![StateUpdate::locked(
                handle,
                retry::upgrade_request(target_tag),
            )])
            .await?;
        Ok(())
    }

    /// Move handles back to ADVISED and release their work claims.
    ///
    /// The lock reason is kept so the next failure continues the attempt count.
    pub async fn reset_failed_handles(&self, handles: Vec<Handle>) -> Result<()> {
        let ids: Vec<HandleId> = handles.iter().map(|handle| handle.id.clone()).collect();
        let updates = handles
            .into_iter()
            .map(|handle| StateUpdate::new(handle, CmHandleState::Advised))
            .collect();
        self.updater.update_states(updates).await?;
        for id in ids {
            if let Err(e) = self.claims.remove(id.as_str()).await {
                error!("Failed to release work claim of {}: {}", id, e);
            }
        }
        Ok(())
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("sync panicked: {}", message)
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("sync panicked: {}", message)
    } else {
        "sync panicked".to_string()
    }
}
