//! Schema-set and anchor maintenance for one handle.
//!
//! A handle's model lives in a schema set named by its module-set tag (shared
//! by every handle with that tag) or by its id when untagged, and is bound to
//! the handle through an anchor named by the handle id.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use cmsync_common::handle::schema_set_name;
use cmsync_common::{
    CmHandleState, Error, Handle, HandleId, ModuleReference, Result,
    NFP_OPERATIONAL_DATASTORE_DATASPACE_NAME,
};
use cmsync_dispatch::ModelOperations;
use cmsync_storage::{InventoryStore, SchemaStore};

use crate::retry;

/// Modules a schema set needs, and the sources the store does not have yet.
#[derive(Debug, Default)]
struct ModuleDelta {
    all_references: Vec<ModuleReference>,
    new_content: HashMap<String, String>,
}

/// Builds and upgrades the schema sets and anchors of handles.
///
/// Plugin errors propagate; callers own the lifecycle transitions.
#[derive(Clone)]
pub struct ModuleSyncService {
    inventory: Arc<dyn InventoryStore>,
    schema: Arc<dyn SchemaStore>,
    model: ModelOperations,
}

impl ModuleSyncService {
    pub fn new(
        inventory: Arc<dyn InventoryStore>,
        schema: Arc<dyn SchemaStore>,
        model: ModelOperations,
    ) -> Self {
        Self {
            inventory,
            schema,
            model,
        }
    }

    /// Create the schema set and anchor of a newly advised handle.
    ///
    /// A schema set that already exists is kept; an existing anchor is
    /// repointed to it.
    pub async fn sync_and_create_schema_set_and_anchor(&self, handle: &Handle) -> Result<()> {
        let delta = self.module_delta(handle, &handle.module_set_tag).await?;
        let schema_set = handle.schema_set_name();
        self.create_schema_set_if_absent(schema_set, delta).await?;
        self.ensure_anchor(schema_set, &handle.id).await?;
        info!(
            "Synchronized {} into schema set {}",
            handle.id, schema_set
        );
        Ok(())
    }

    /// Move a handle to the module set named in its upgrade lock reason.
    ///
    /// An untagged target upgrades the handle's own schema set in place. A
    /// tagged target reuses the shared schema set if it exists. The anchor is
    /// then repointed and the new tag persisted onto the handle.
    pub async fn sync_and_upgrade_schema_set(&self, handle: &Handle) -> Result<()> {
        let target_tag = retry::target_tag(handle.composite_state.lock_reason.as_ref());
        let target_set = schema_set_name(&target_tag, &handle.id);
        let delta = self.module_delta(handle, &target_tag).await?;

        if target_tag.trim().is_empty() {
            if self
                .schema
                .schema_set_exists(NFP_OPERATIONAL_DATASTORE_DATASPACE_NAME, target_set)
                .await?
            {
                self.schema
                    .upgrade_schema_set(
                        NFP_OPERATIONAL_DATASTORE_DATASPACE_NAME,
                        target_set,
                        delta.new_content,
                        delta.all_references,
                    )
                    .await?;
            } else {
                self.create_schema_set_if_absent(target_set, delta).await?;
            }
        } else {
            self.create_schema_set_if_absent(target_set, delta).await?;
        }

        self.ensure_anchor(target_set, &handle.id).await?;
        if handle.module_set_tag != target_tag {
            self.inventory
                .update_module_set_tag(&handle.id, &target_tag)
                .await?;
        }
        info!(
            "Upgraded {} from module set '{}' to '{}'",
            handle.id, handle.module_set_tag, target_tag
        );
        Ok(())
    }

    /// Delete the handle's own schema set (and its anchors) if present.
    pub async fn delete_schema_set_if_exists(&self, id: &HandleId) -> Result<()> {
        let existed = self
            .schema
            .delete_schema_set(NFP_OPERATIONAL_DATASTORE_DATASPACE_NAME, id.as_str())
            .await?;
        if existed {
            debug!("Deleted leftover schema set of {}", id);
        }
        Ok(())
    }

    async fn module_delta(&self, handle: &Handle, module_set_tag: &str) -> Result<ModuleDelta> {
        if let Some(all_references) = self.shared_references(handle, module_set_tag).await? {
            debug!(
                "Reusing module set '{}' for {}",
                module_set_tag, handle.id
            );
            return Ok(ModuleDelta {
                all_references,
                new_content: HashMap::new(),
            });
        }

        // The plugin is asked about the module set being moved to.
        let target = handle.clone().with_module_set_tag(module_set_tag);
        let all_references = self.model.fetch_module_references(&target).await?;
        let new_references = self
            .schema
            .identify_new_module_references(&all_references)
            .await?;
        let new_content = self
            .model
            .fetch_schema_content(&target, &new_references)
            .await?;
        Ok(ModuleDelta {
            all_references,
            new_content,
        })
    }

    /// Module references of a tag's schema set, if another READY handle uses it.
    async fn shared_references(
        &self,
        handle: &Handle,
        module_set_tag: &str,
    ) -> Result<Option<Vec<ModuleReference>>> {
        if module_set_tag.trim().is_empty() {
            return Ok(None);
        }
        let ready = self
            .inventory
            .query_ids_by_module_set_tag(module_set_tag, CmHandleState::Ready)
            .await?;
        if !ready.iter().any(|id| id != &handle.id) {
            return Ok(None);
        }
        if !self
            .schema
            .schema_set_exists(NFP_OPERATIONAL_DATASTORE_DATASPACE_NAME, module_set_tag)
            .await?
        {
            return Ok(None);
        }
        self.schema
            .module_references_for_schema_set(NFP_OPERATIONAL_DATASTORE_DATASPACE_NAME, module_set_tag)
            .await
            .map(Some)
    }

    async fn create_schema_set_if_absent(&self, schema_set: &str, delta: ModuleDelta) -> Result<()> {
        match self
            .schema
            .create_schema_set(
                NFP_OPERATIONAL_DATASTORE_DATASPACE_NAME,
                schema_set,
                delta.new_content,
                delta.all_references,
            )
            .await
        {
            Err(Error::AlreadyDefined(_)) => {
                debug!("Schema set {} already defined", schema_set);
                Ok(())
            }
            other => other,
        }
    }

    async fn ensure_anchor(&self, schema_set: &str, id: &HandleId) -> Result<()> {
        match self
            .schema
            .create_anchor(NFP_OPERATIONAL_DATASTORE_DATASPACE_NAME, schema_set, id.as_str())
            .await
        {
            Err(Error::AlreadyDefined(_)) => {
                debug!("Anchor {} exists, binding it to {}", id, schema_set);
                self.schema
                    .update_anchor_schema_set(
                        NFP_OPERATIONAL_DATASTORE_DATASPACE_NAME,
                        id.as_str(),
                        schema_set,
                    )
                    .await
            }
            other => other,
        }
    }
}
