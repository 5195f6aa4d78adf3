//! Schema-set, anchor and operational data store contracts.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

use cmsync_common::{ModuleReference, Result};

/// Schema sets (named module collections) and the anchors binding handles to them.
#[async_trait]
pub trait SchemaStore: Send + Sync {
    /// Check whether a schema set exists.
    async fn schema_set_exists(&self, dataspace: &str, schema_set: &str) -> Result<bool>;

    /// Create a schema set.
    ///
    /// `new_module_content` maps module name to source for modules the store
    /// has never seen; `all_module_references` is the complete module list of
    /// the set.
    ///
    /// # Errors
    /// - `AlreadyDefined` if the schema set exists
    async fn create_schema_set(
        &self,
        dataspace: &str,
        schema_set: &str,
        new_module_content: HashMap<String, String>,
        all_module_references: Vec<ModuleReference>,
    ) -> Result<()>;

    /// Replace the module list of an existing schema set.
    ///
    /// # Errors
    /// - `NotFound` if the schema set does not exist
    async fn upgrade_schema_set(
        &self,
        dataspace: &str,
        schema_set: &str,
        new_module_content: HashMap<String, String>,
        all_module_references: Vec<ModuleReference>,
    ) -> Result<()>;

    /// Delete a schema set and every anchor bound to it.
    ///
    /// Returns whether the set existed.
    async fn delete_schema_set(&self, dataspace: &str, schema_set: &str) -> Result<bool>;

    /// Create an anchor bound to a schema set.
    ///
    /// # Errors
    /// - `NotFound` if the schema set does not exist
    /// - `AlreadyDefined` if the anchor exists
    async fn create_anchor(&self, dataspace: &str, schema_set: &str, anchor: &str) -> Result<()>;

    /// Repoint an existing anchor to another schema set.
    async fn update_anchor_schema_set(
        &self,
        dataspace: &str,
        anchor: &str,
        schema_set: &str,
    ) -> Result<()>;

    /// The subset of `references` whose content is not stored yet.
    async fn identify_new_module_references(
        &self,
        references: &[ModuleReference],
    ) -> Result<Vec<ModuleReference>>;

    /// Module references of the schema set a given anchor is bound to.
    async fn module_references_for_anchor(
        &self,
        dataspace: &str,
        anchor: &str,
    ) -> Result<Vec<ModuleReference>>;

    /// Module references of a schema set.
    async fn module_references_for_schema_set(
        &self,
        dataspace: &str,
        schema_set: &str,
    ) -> Result<Vec<ModuleReference>>;

    /// Top-level data node references declared by an anchor's schema set.
    async fn root_node_references(&self, dataspace: &str, anchor: &str) -> Result<Vec<String>>;
}

/// Hierarchical data store, consumed as dataspace/anchor/xpath.
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Save (replace) the data under `xpath` of an anchor.
    async fn save_data(&self, dataspace: &str, anchor: &str, xpath: &str, data: Value) -> Result<()>;

    /// Read the data saved under `xpath`, if any.
    async fn get_data(&self, dataspace: &str, anchor: &str, xpath: &str) -> Result<Option<Value>>;
}
