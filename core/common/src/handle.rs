//! Managed handle model and its composite lifecycle state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::types::HandleId;

/// Lifecycle state of a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CmHandleState {
    /// Registered, schema not yet synchronized.
    Advised,
    /// Schema known, handle usable.
    Ready,
    /// Blocked; see the lock reason.
    Locked,
}

impl fmt::Display for CmHandleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CmHandleState::Advised => "ADVISED",
            CmHandleState::Ready => "READY",
            CmHandleState::Locked => "LOCKED",
        };
        f.write_str(name)
    }
}

/// Why a handle is locked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockReasonCategory {
    /// Module sync attempt failed.
    ModuleSyncFailed,
    /// Upgrade to a new module set requested, not attempted yet.
    ModuleUpgrade,
    /// Upgrade attempt failed.
    ModuleUpgradeFailed,
    /// Plugin misbehaving; not handled by the module sync watchdog.
    LockedMisbehaving,
}

impl LockReasonCategory {
    /// Categories the module sync watchdog recovers from.
    pub const SCHEMA_RELATED: [LockReasonCategory; 3] = [
        LockReasonCategory::ModuleSyncFailed,
        LockReasonCategory::ModuleUpgrade,
        LockReasonCategory::ModuleUpgradeFailed,
    ];

    /// Whether this category describes an upgrade (requested or failed).
    pub fn is_upgrade(&self) -> bool {
        matches!(
            self,
            LockReasonCategory::ModuleUpgrade | LockReasonCategory::ModuleUpgradeFailed
        )
    }

    /// Short human-readable description used in logs.
    pub fn description(&self) -> &'static str {
        match self {
            LockReasonCategory::ModuleSyncFailed => "locked due to synchronization failure",
            LockReasonCategory::ModuleUpgrade => "locked for module upgrade",
            LockReasonCategory::ModuleUpgradeFailed => "locked due to module upgrade failure",
            LockReasonCategory::LockedMisbehaving => "locked because the plugin misbehaves",
        }
    }
}

impl fmt::Display for LockReasonCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LockReasonCategory::ModuleSyncFailed => "MODULE_SYNC_FAILED",
            LockReasonCategory::ModuleUpgrade => "MODULE_UPGRADE",
            LockReasonCategory::ModuleUpgradeFailed => "MODULE_UPGRADE_FAILED",
            LockReasonCategory::LockedMisbehaving => "LOCKED_MISBEHAVING",
        };
        f.write_str(name)
    }
}

/// Lock reason: category plus free-text details carrying retry bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockReason {
    #[serde(rename = "reason")]
    pub category: LockReasonCategory,
    #[serde(default)]
    pub details: String,
}

impl LockReason {
    pub fn new(category: LockReasonCategory, details: impl Into<String>) -> Self {
        Self {
            category,
            details: details.into(),
        }
    }
}

/// Sync state of a handle's operational datastore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataStoreSyncState {
    Unsynchronized,
    Synchronized,
    /// Data sync disabled for the handle.
    NoneRequested,
}

/// Operational datastore bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationalDataStore {
    pub sync_state: DataStoreSyncState,
    #[serde(default)]
    pub last_sync_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataStores {
    #[serde(default)]
    pub operational: Option<OperationalDataStore>,
}

/// Mutable lifecycle sub-record of a handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositeState {
    pub cm_handle_state: CmHandleState,
    #[serde(default)]
    pub lock_reason: Option<LockReason>,
    #[serde(default)]
    pub data_sync_enabled: bool,
    #[serde(default)]
    pub data_stores: DataStores,
    pub last_update_time: DateTime<Utc>,
}

impl CompositeState {
    /// Fresh state of a newly registered handle.
    pub fn advised(data_sync_enabled: bool) -> Self {
        Self {
            cm_handle_state: CmHandleState::Advised,
            lock_reason: None,
            data_sync_enabled,
            data_stores: DataStores::default(),
            last_update_time: Utc::now(),
        }
    }

    /// Lock category, if the handle is locked with a reason.
    pub fn lock_category(&self) -> Option<LockReasonCategory> {
        self.lock_reason.as_ref().map(|reason| reason.category)
    }

    /// Whether the lock reason marks a requested or failed upgrade.
    pub fn in_upgrade_or_upgrade_failed(&self) -> bool {
        self.lock_category()
            .map(|category| category.is_upgrade())
            .unwrap_or(false)
    }

    /// Operational sync state, if the operational datastore is tracked.
    pub fn operational_sync_state(&self) -> Option<DataStoreSyncState> {
        self.data_stores
            .operational
            .as_ref()
            .map(|operational| operational.sync_state)
    }

    /// Eligible for module sync.
    pub fn is_module_sync_candidate(&self) -> bool {
        self.cm_handle_state == CmHandleState::Advised
    }

    /// Eligible for data sync.
    pub fn is_data_sync_candidate(&self) -> bool {
        self.cm_handle_state == CmHandleState::Ready
            && self.operational_sync_state() == Some(DataStoreSyncState::Unsynchronized)
    }

    /// Apply a lifecycle transition together with its side effects.
    ///
    /// READY clears the lock reason and resets the operational datastore;
    /// ADVISED keeps the previous lock reason so that retry bookkeeping
    /// survives a reset; LOCKED takes the lock reason already set by the caller.
    pub fn transition_to(&mut self, target: CmHandleState, now: DateTime<Utc>) {
        match target {
            CmHandleState::Ready => {
                self.lock_reason = None;
                let sync_state = if self.data_sync_enabled {
                    DataStoreSyncState::Unsynchronized
                } else {
                    DataStoreSyncState::NoneRequested
                };
                self.data_stores.operational = Some(OperationalDataStore {
                    sync_state,
                    last_sync_time: None,
                });
            }
            CmHandleState::Advised | CmHandleState::Locked => {}
        }
        self.cm_handle_state = target;
        self.last_update_time = now;
    }

    /// Record a completed operational data sync.
    pub fn mark_synchronized(&mut self, now: DateTime<Utc>) {
        self.data_stores.operational = Some(OperationalDataStore {
            sync_state: DataStoreSyncState::Synchronized,
            last_sync_time: Some(now),
        });
        self.last_update_time = now;
    }
}

/// Plugin service names bound to a handle.
///
/// A non-blank common name serves both operation kinds; otherwise the
/// per-kind names are used.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginBindings {
    #[serde(default)]
    pub dmi_service_name: Option<String>,
    #[serde(default)]
    pub dmi_data_service_name: Option<String>,
    #[serde(default)]
    pub dmi_model_service_name: Option<String>,
}

impl PluginBindings {
    /// One plugin serving both schema and data operations.
    pub fn common(service_name: impl Into<String>) -> Self {
        Self {
            dmi_service_name: Some(service_name.into()),
            ..Self::default()
        }
    }

    /// Separate plugins for schema and data operations.
    pub fn split(model_service_name: impl Into<String>, data_service_name: impl Into<String>) -> Self {
        Self {
            dmi_service_name: None,
            dmi_data_service_name: Some(data_service_name.into()),
            dmi_model_service_name: Some(model_service_name.into()),
        }
    }
}

/// A managed network element proxy registered in the inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handle {
    pub id: HandleId,
    #[serde(default)]
    pub alternate_id: Option<String>,
    #[serde(flatten)]
    pub plugins: PluginBindings,
    /// Plugin-specific properties, forwarded on every plugin call.
    #[serde(default)]
    pub dmi_properties: BTreeMap<String, String>,
    /// Publicly exposed properties.
    #[serde(default)]
    pub public_properties: BTreeMap<String, String>,
    /// Shared schema-set tag; empty means a handle-specific schema set.
    #[serde(default)]
    pub module_set_tag: String,
    pub composite_state: CompositeState,
}

impl Handle {
    /// A newly registered handle in ADVISED state.
    pub fn advised(id: HandleId, plugins: PluginBindings) -> Self {
        Self {
            id,
            alternate_id: None,
            plugins,
            dmi_properties: BTreeMap::new(),
            public_properties: BTreeMap::new(),
            module_set_tag: String::new(),
            composite_state: CompositeState::advised(true),
        }
    }

    pub fn with_module_set_tag(mut self, tag: impl Into<String>) -> Self {
        self.module_set_tag = tag.into();
        self
    }

    pub fn with_dmi_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.dmi_properties.insert(name.into(), value.into());
        self
    }

    pub fn with_alternate_id(mut self, alternate_id: impl Into<String>) -> Self {
        self.alternate_id = Some(alternate_id.into());
        self
    }

    pub fn state(&self) -> CmHandleState {
        self.composite_state.cm_handle_state
    }

    /// Name of the schema set this handle's model lives in.
    pub fn schema_set_name(&self) -> &str {
        schema_set_name(&self.module_set_tag, &self.id)
    }

    /// Whether `reference` names this handle by id or alternate id.
    pub fn is_referenced_by(&self, reference: &str) -> bool {
        self.id.as_str() == reference || self.alternate_id.as_deref() == Some(reference)
    }
}

/// Schema-set name for a tag: the tag itself, or the handle id when blank.
pub fn schema_set_name<'a>(module_set_tag: &'a str, handle_id: &'a HandleId) -> &'a str {
    if module_set_tag.trim().is_empty() {
        handle_id.as_str()
    } else {
        module_set_tag
    }
}
