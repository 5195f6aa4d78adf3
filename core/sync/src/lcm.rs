//! Lifecycle state updates and their notifications.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use cmsync_common::{CmHandleState, Handle, HandleId, LockReason, Result};
use cmsync_storage::InventoryStore;

/// One handle moving between lifecycle states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateTransition {
    pub handle_id: HandleId,
    pub old_state: CmHandleState,
    pub new_state: CmHandleState,
    pub lock_reason: Option<LockReason>,
}

/// Sink for lifecycle-change notifications.
#[async_trait]
pub trait LcmEventsPublisher: Send + Sync {
    async fn publish_state_transitions(&self, transitions: Vec<StateTransition>) -> Result<()>;
}

/// Publishes transitions as log lines.
#[derive(Debug, Clone, Default)]
pub struct TracingLcmPublisher;

#[async_trait]
impl LcmEventsPublisher for TracingLcmPublisher {
    async fn publish_state_transitions(&self, transitions: Vec<StateTransition>) -> Result<()> {
        for transition in &transitions {
            info!(
                "Handle {} moved from {} to {}",
                transition.handle_id, transition.old_state, transition.new_state
            );
        }
        Ok(())
    }
}

/// Records every published batch, for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct MemoryLcmPublisher {
    batches: Arc<Mutex<Vec<Vec<StateTransition>>>>,
}

impl MemoryLcmPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Published batches, oldest first.
    pub async fn batches(&self) -> Vec<Vec<StateTransition>> {
        self.batches.lock().await.clone()
    }
}

#[async_trait]
impl LcmEventsPublisher for MemoryLcmPublisher {
    async fn publish_state_transitions(&self, transitions: Vec<StateTransition>) -> Result<()> {
        self.batches.lock().await.push(transitions);
        Ok(())
    }
}

/// Target state of one handle in a batch update.
#[derive(Debug, Clone)]
pub struct StateUpdate {
    pub handle: Handle,
    pub target: CmHandleState,
    /// Lock reason to set; only used when the target is LOCKED.
    pub lock_reason: Option<LockReason>,
}

impl StateUpdate {
    pub fn new(handle: Handle, target: CmHandleState) -> Self {
        Self {
            handle,
            target,
            lock_reason: None,
        }
    }

    pub fn locked(handle: Handle, lock_reason: LockReason) -> Self {
        Self {
            handle,
            target: CmHandleState::Locked,
            lock_reason: Some(lock_reason),
        }
    }
}

/// Applies lifecycle transitions in batches and announces them.
#[derive(Clone)]
pub struct CmHandleStateUpdater {
    inventory: Arc<dyn InventoryStore>,
    publisher: Arc<dyn LcmEventsPublisher>,
}

impl CmHandleStateUpdater {
    pub fn new(inventory: Arc<dyn InventoryStore>, publisher: Arc<dyn LcmEventsPublisher>) -> Self {
        Self {
            inventory,
            publisher,
        }
    }

    /// Persist all updates with one store write and publish them with one call.
    ///
    /// Updates whose target equals the current state are skipped unless they
    /// carry a new lock reason (a LOCKED handle failing again). Nothing is
    /// written or published when no update remains.
    ///
    /// # Errors
    /// - Store errors; nothing is published in that case
    pub async fn update_states(&self, updates: Vec<StateUpdate>) -> Result<Vec<StateTransition>> {
        let now = Utc::now();
        let mut states = Vec::with_capacity(updates.len());
        let mut transitions = Vec::with_capacity(updates.len());

        for update in updates {
            let mut state = update.handle.composite_state.clone();
            let old_state = state.cm_handle_state;
            let lock_changed = update.target == CmHandleState::Locked
                && update.lock_reason.is_some()
                && update.lock_reason != state.lock_reason;
            if old_state == update.target && !lock_changed {
                debug!("Handle {} already {}, skipping", update.handle.id, old_state);
                continue;
            }
            if update.target == CmHandleState::Locked {
                state.lock_reason = update.lock_reason;
            }
            state.transition_to(update.target, now);
            transitions.push(StateTransition {
                handle_id: update.handle.id.clone(),
                old_state,
                new_state: update.target,
                lock_reason: state.lock_reason.clone(),
            });
            states.push((update.handle.id, state));
        }

        if states.is_empty() {
            return Ok(transitions);
        }
        self.inventory.save_composite_states(states).await?;
        self.publisher
            .publish_state_transitions(transitions.clone())
            .await?;
        Ok(transitions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmsync_common::{LockReasonCategory, PluginBindings};
    use cmsync_storage::MemoryInventoryStore;

    fn handle(id: &str) -> Handle {
        Handle::advised(HandleId::new(id).unwrap(), PluginBindings::common("dmi-1"))
    }

    #[tokio::test]
    async fn test_batch_is_saved_and_published_once() {
        let inventory = MemoryInventoryStore::with_handles(vec![handle("ch-1"), handle("ch-2")]);
        let publisher = MemoryLcmPublisher::new();
        let updater = CmHandleStateUpdater::new(Arc::new(inventory.clone()), Arc::new(publisher.clone()));

        let reason = LockReason::new(LockReasonCategory::ModuleSyncFailed, "Attempt #1 failed: x");
        let transitions = updater
            .update_states(vec![
                StateUpdate::new(handle("ch-1"), CmHandleState::Ready),
                StateUpdate::locked(handle("ch-2"), reason.clone()),
            ])
            .await
            .unwrap();
        assert_eq!(transitions.len(), 2);

        let batches = publisher.batches().await;
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 2);

        let ready = inventory.get(&HandleId::new("ch-1").unwrap()).await.unwrap();
        assert_eq!(ready.state(), CmHandleState::Ready);
        assert!(ready.composite_state.lock_reason.is_none());

        let locked = inventory.get(&HandleId::new("ch-2").unwrap()).await.unwrap();
        assert_eq!(locked.state(), CmHandleState::Locked);
        assert_eq!(locked.composite_state.lock_reason, Some(reason));
    }

    #[tokio::test]
    async fn test_same_state_is_skipped() {
        let inventory = MemoryInventoryStore::with_handles(vec![handle("ch-1")]);
        let publisher = MemoryLcmPublisher::new();
        let updater = CmHandleStateUpdater::new(Arc::new(inventory), Arc::new(publisher.clone()));

        let transitions = updater
            .update_states(vec![StateUpdate::new(handle("ch-1"), CmHandleState::Advised)])
            .await
            .unwrap();
        assert!(transitions.is_empty());
        assert!(publisher.batches().await.is_empty());
    }

    #[tokio::test]
    async fn test_relock_with_new_reason_is_recorded() {
        let first = LockReason::new(LockReasonCategory::ModuleSyncFailed, "Attempt #1 failed: x");
        let second = LockReason::new(LockReasonCategory::ModuleSyncFailed, "Attempt #2 failed: x");
        let mut locked = handle("ch-1");
        locked.composite_state.lock_reason = Some(first);
        locked
            .composite_state
            .transition_to(CmHandleState::Locked, Utc::now());
        let inventory = MemoryInventoryStore::with_handles(vec![locked.clone()]);
        let updater = CmHandleStateUpdater::new(
            Arc::new(inventory.clone()),
            Arc::new(MemoryLcmPublisher::new()),
        );

        let transitions = updater
            .update_states(vec![StateUpdate::locked(locked, second.clone())])
            .await
            .unwrap();
        assert_eq!(transitions.len(), 1);
        let stored = inventory.get(&HandleId::new("ch-1").unwrap()).await.unwrap();
        assert_eq!(stored.composite_state.lock_reason, Some(second));
    }

    #[tokio::test]
    async fn test_unknown_handle_fails_without_publishing() {
        let publisher = MemoryLcmPublisher::new();
        let updater = CmHandleStateUpdater::new(
            Arc::new(MemoryInventoryStore::new()),
            Arc::new(publisher.clone()),
        );
        let result = updater
            .update_states(vec![StateUpdate::new(handle("ch-9"), CmHandleState::Ready)])
            .await;
        assert!(result.is_err());
        assert!(publisher.batches().await.is_empty());
    }
}
