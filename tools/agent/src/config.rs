//! Agent configuration file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use cmsync_common::{Handle, HandleId, PluginBindings};
use cmsync_dispatch::DispatchConfig;
use cmsync_sync::SyncConfig;

/// Everything the agent reads from its JSON config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub sync: SyncConfig,
    pub dispatch: DispatchConfig,
    /// Handles registered at startup.
    pub handles: Vec<HandleRegistration>,
}

/// A handle to register in ADVISED state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandleRegistration {
    pub id: String,
    #[serde(default)]
    pub alternate_id: Option<String>,
    #[serde(flatten)]
    pub plugins: PluginBindings,
    #[serde(default)]
    pub module_set_tag: String,
    #[serde(default = "default_data_sync_enabled")]
    pub data_sync_enabled: bool,
    #[serde(default)]
    pub dmi_properties: BTreeMap<String, String>,
}

fn default_data_sync_enabled() -> bool {
    true
}

impl HandleRegistration {
    pub fn to_handle(&self) -> Result<Handle> {
        let id = HandleId::new(self.id.clone()).context("Invalid handle id")?;
        let mut handle = Handle::advised(id, self.plugins.clone())
            .with_module_set_tag(self.module_set_tag.clone());
        handle.alternate_id = self.alternate_id.clone();
        handle.dmi_properties = self.dmi_properties.clone();
        handle.composite_state.data_sync_enabled = self.data_sync_enabled;
        Ok(handle)
    }
}

impl AgentConfig {
    /// Load a config file; missing sections fall back to defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn handles(&self) -> Result<Vec<Handle>> {
        self.handles.iter().map(HandleRegistration::to_handle).collect()
    }
}
