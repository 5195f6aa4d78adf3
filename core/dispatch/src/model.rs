//! Schema operations against a handle's model plugin.

use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use cmsync_common::{Handle, ModuleReference, Result};

use crate::resolver::{resolve_plugin_instance, OperationKind};
use crate::transport::{PluginRequest, PluginTransport};

#[derive(Debug, Deserialize)]
struct ModulesResponse {
    #[serde(default)]
    schemas: Vec<ModuleReference>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModuleResource {
    module_name: String,
    #[serde(default)]
    yang_source: String,
}

/// Fetches module references and module sources from model plugins.
#[derive(Clone)]
pub struct ModelOperations {
    transport: Arc<dyn PluginTransport>,
}

impl ModelOperations {
    pub fn new(transport: Arc<dyn PluginTransport>) -> Self {
        Self { transport }
    }

    /// Module references the handle's plugin reports.
    ///
    /// # Errors
    /// - `InvalidInput` if the handle has no schema plugin
    /// - `PluginUnavailable` / `PluginRejected` from the transport
    pub async fn fetch_module_references(&self, handle: &Handle) -> Result<Vec<ModuleReference>> {
        let service = resolve_plugin_instance(handle, OperationKind::Schema)?;
        let request = PluginRequest::new(
            service,
            &["ch", handle.id.as_str(), "modules"],
            OperationKind::Schema,
            request_body(handle, None),
        );
        let response: ModulesResponse = serde_json::from_value(self.transport.post(request).await?)?;
        debug!(
            "Plugin reported {} modules for handle {}",
            response.schemas.len(),
            handle.id
        );
        Ok(response.schemas)
    }

    /// Sources of the given modules, keyed by module name.
    ///
    /// An empty reference list returns an empty map without a network call.
    pub async fn fetch_schema_content(
        &self,
        handle: &Handle,
        references: &[ModuleReference],
    ) -> Result<HashMap<String, String>> {
        if references.is_empty() {
            return Ok(HashMap::new());
        }
        let service = resolve_plugin_instance(handle, OperationKind::Schema)?;
        let modules: Vec<Value> = references
            .iter()
            .map(|reference| json!({"name": reference.module_name, "revision": reference.revision}))
            .collect();
        let request = PluginRequest::new(
            service,
            &["ch", handle.id.as_str(), "moduleResources"],
            OperationKind::Schema,
            request_body(handle, Some(json!({ "modules": modules }))),
        );
        let resources: Vec<ModuleResource> =
            serde_json::from_value(self.transport.post(request).await?)?;
        Ok(resources
            .into_iter()
            .map(|resource| (resource.module_name, resource.yang_source))
            .collect())
    }
}

fn request_body(handle: &Handle, data: Option<Value>) -> Value {
    let mut body = Map::new();
    if !handle.module_set_tag.trim().is_empty() {
        body.insert("moduleSetTag".to_string(), json!(handle.module_set_tag));
    }
    if let Some(data) = data {
        body.insert("data".to_string(), data);
    }
    body.insert("cmHandleProperties".to_string(), json!(handle.dmi_properties));
    Value::Object(body)
}
