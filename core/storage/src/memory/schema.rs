//! In-memory schema sets, anchors and data.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use cmsync_common::{Error, ModuleReference, Result};

use crate::schema::{DataStore, SchemaStore};

type Key = (String, String);

fn key(dataspace: &str, name: &str) -> Key {
    (dataspace.to_string(), name.to_string())
}

#[derive(Default)]
struct SchemaState {
    schema_sets: HashMap<Key, Vec<ModuleReference>>,
    anchors: HashMap<Key, String>,
    module_content: HashMap<ModuleReference, String>,
}

impl SchemaState {
    fn store_content(
        &mut self,
        new_module_content: HashMap<String, String>,
        references: &[ModuleReference],
    ) {
        for reference in references {
            if let Some(source) = new_module_content.get(&reference.module_name) {
                self.module_content
                    .entry(reference.clone())
                    .or_insert_with(|| source.clone());
            }
        }
    }
}

/// In-memory schema store.
#[derive(Clone, Default)]
pub struct MemorySchemaStore {
    state: Arc<RwLock<SchemaState>>,
}

impl MemorySchemaStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of all anchors in a dataspace, sorted.
    pub async fn anchor_names(&self, dataspace: &str) -> Vec<String> {
        let state = self.state.read().await;
        let mut names: Vec<String> = state
            .anchors
            .keys()
            .filter(|(space, _)| space == dataspace)
            .map(|(_, name)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Schema set an anchor is bound to.
    pub async fn anchor_schema_set(&self, dataspace: &str, anchor: &str) -> Option<String> {
        self.state
            .read()
            .await
            .anchors
            .get(&key(dataspace, anchor))
            .cloned()
    }

    /// Stored source of a module.
    pub async fn module_content(&self, reference: &ModuleReference) -> Option<String> {
        self.state.read().await.module_content.get(reference).cloned()
    }
}

#[async_trait]
impl SchemaStore for MemorySchemaStore {
    async fn schema_set_exists(&self, dataspace: &str, schema_set: &str) -> Result<bool> {
        Ok(self
            .state
            .read()
            .await
            .schema_sets
            .contains_key(&key(dataspace, schema_set)))
    }

    async fn create_schema_set(
        &self,
        dataspace: &str,
        schema_set: &str,
        new_module_content: HashMap<String, String>,
        all_module_references: Vec<ModuleReference>,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let schema_set_key = key(dataspace, schema_set);
        if state.schema_sets.contains_key(&schema_set_key) {
            return Err(Error::AlreadyDefined(format!(
                "Schema set already defined: {}",
                schema_set
            )));
        }
        state.store_content(new_module_content, &all_module_references);
        debug!(
            "Created schema set {} with {} modules",
            schema_set,
            all_module_references.len()
        );
        state.schema_sets.insert(schema_set_key, all_module_references);
        Ok(())
    }

    async fn upgrade_schema_set(
        &self,
        dataspace: &str,
        schema_set: &str,
        new_module_content: HashMap<String, String>,
        all_module_references: Vec<ModuleReference>,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let schema_set_key = key(dataspace, schema_set);
        if !state.schema_sets.contains_key(&schema_set_key) {
            return Err(Error::NotFound(format!("Schema set not found: {}", schema_set)));
        }
        state.store_content(new_module_content, &all_module_references);
        state.schema_sets.insert(schema_set_key, all_module_references);
        Ok(())
    }

    async fn delete_schema_set(&self, dataspace: &str, schema_set: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        let existed = state
            .schema_sets
            .remove(&key(dataspace, schema_set))
            .is_some();
        state
            .anchors
            .retain(|(space, _), bound| !(space == dataspace && bound == schema_set));
        Ok(existed)
    }

    async fn create_anchor(&self, dataspace: &str, schema_set: &str, anchor: &str) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.schema_sets.contains_key(&key(dataspace, schema_set)) {
            return Err(Error::NotFound(format!("Schema set not found: {}", schema_set)));
        }
        let anchor_key = key(dataspace, anchor);
        if state.anchors.contains_key(&anchor_key) {
            return Err(Error::AlreadyDefined(format!("Anchor already defined: {}", anchor)));
        }
        state.anchors.insert(anchor_key, schema_set.to_string());
        Ok(())
    }

    async fn update_anchor_schema_set(
        &self,
        dataspace: &str,
        anchor: &str,
        schema_set: &str,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.schema_sets.contains_key(&key(dataspace, schema_set)) {
            return Err(Error::NotFound(format!("Schema set not found: {}", schema_set)));
        }
        let bound = state
            .anchors
            .get_mut(&key(dataspace, anchor))
            .ok_or_else(|| Error::NotFound(format!("Anchor not found: {}", anchor)))?;
        *bound = schema_set.to_string();
        Ok(())
    }

    async fn identify_new_module_references(
        &self,
        references: &[ModuleReference],
    ) -> Result<Vec<ModuleReference>> {
        let state = self.state.read().await;
        let mut seen = HashSet::new();
        Ok(references
            .iter()
            .filter(|reference| !state.module_content.contains_key(*reference))
            .filter(|reference| seen.insert((*reference).clone()))
            .cloned()
            .collect())
    }

    async fn module_references_for_anchor(
        &self,
        dataspace: &str,
        anchor: &str,
    ) -> Result<Vec<ModuleReference>> {
        let schema_set = self
            .anchor_schema_set(dataspace, anchor)
            .await
            .ok_or_else(|| Error::NotFound(format!("Anchor not found: {}", anchor)))?;
        self.module_references_for_schema_set(dataspace, &schema_set)
            .await
    }

    async fn module_references_for_schema_set(
        &self,
        dataspace: &str,
        schema_set: &str,
    ) -> Result<Vec<ModuleReference>> {
        self.state
            .read()
            .await
            .schema_sets
            .get(&key(dataspace, schema_set))
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Schema set not found: {}", schema_set)))
    }

    async fn root_node_references(&self, dataspace: &str, anchor: &str) -> Result<Vec<String>> {
        let references = self.module_references_for_anchor(dataspace, anchor).await?;
        let mut names: Vec<String> = references
            .into_iter()
            .map(|reference| reference.module_name)
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }
}

/// In-memory hierarchical data store keyed by dataspace, anchor and xpath.
#[derive(Clone, Default)]
pub struct MemoryDataStore {
    data: Arc<RwLock<HashMap<(String, String, String), Value>>>,
}

impl MemoryDataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DataStore for MemoryDataStore {
    async fn save_data(&self, dataspace: &str, anchor: &str, xpath: &str, data: Value) -> Result<()> {
        self.data.write().await.insert(
            (dataspace.to_string(), anchor.to_string(), xpath.to_string()),
            data,
        );
        Ok(())
    }

    async fn get_data(&self, dataspace: &str, anchor: &str, xpath: &str) -> Result<Option<Value>> {
        Ok(self
            .data
            .read()
            .await
            .get(&(dataspace.to_string(), anchor.to_string(), xpath.to_string()))
            .cloned())
    }
}
