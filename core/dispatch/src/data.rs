//! Data operations: single-handle reads and per-plugin batches.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use cmsync_common::{CmHandleState, Error, Handle, HandleId, Result};
use cmsync_storage::InventoryStore;

use crate::config::DispatchConfig;
use crate::events::{
    DataOperationEvent, DataOperationEventPublisher, DataOperationResponse, NcmpResponseStatus,
};
use crate::resolver::{resolve_plugin_instance, OperationKind};
use crate::transport::{PluginRequest, PluginTransport};

/// Datastore read by the data sync watchdog.
pub const PASSTHROUGH_OPERATIONAL: &str = "ncmp-datastore:passthrough-operational";

const OPERATIONAL: &str = "ncmp-datastore:operational";
const READ: &str = "read";

/// Datastore, handle reference and resource of a single-handle read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceAddress {
    pub datastore: String,
    /// Handle id or alternate id.
    pub handle_reference: String,
    pub resource_identifier: String,
}

impl ResourceAddress {
    pub fn new(
        datastore: impl Into<String>,
        handle_reference: impl Into<String>,
        resource_identifier: impl Into<String>,
    ) -> Self {
        Self {
            datastore: datastore.into(),
            handle_reference: handle_reference.into(),
            resource_identifier: resource_identifier.into(),
        }
    }
}

/// One operation of a batch request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataOperationDefinition {
    pub operation: String,
    pub operation_id: String,
    pub datastore: String,
    #[serde(default)]
    pub options: Option<String>,
    #[serde(default)]
    pub resource_identifier: Option<String>,
    /// Handle ids or alternate ids.
    pub target_ids: Vec<String>,
}

/// Batch of data operations over many handles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataOperationRequest {
    #[serde(rename = "dataOperationDefinitions")]
    pub operations: Vec<DataOperationDefinition>,
}

impl DataOperationRequest {
    fn distinct_references(&self) -> Vec<String> {
        self.operations
            .iter()
            .flat_map(|operation| operation.target_ids.iter().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct PluginOperationHandle {
    id: String,
    cm_handle_properties: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    module_set_tag: String,
}

impl From<&Handle> for PluginOperationHandle {
    fn from(handle: &Handle) -> Self {
        Self {
            id: handle.id.to_string(),
            cm_handle_properties: handle.dmi_properties.clone(),
            module_set_tag: handle.module_set_tag.clone(),
        }
    }
}

/// Operation as sent to one plugin instance.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct PluginDataOperation {
    operation: String,
    operation_id: String,
    datastore: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    resource_identifier: Option<String>,
    cm_handles: Vec<PluginOperationHandle>,
}

impl PluginDataOperation {
    fn without_handles(definition: &DataOperationDefinition) -> Self {
        Self {
            operation: definition.operation.clone(),
            operation_id: definition.operation_id.clone(),
            datastore: definition.datastore.clone(),
            options: definition.options.clone(),
            resource_identifier: definition.resource_identifier.clone(),
            cm_handles: Vec::new(),
        }
    }

    fn failure(&self, status: NcmpResponseStatus) -> DataOperationResponse {
        DataOperationResponse::new(
            self.operation_id.clone(),
            self.cm_handles.iter().map(|handle| handle.id.clone()).collect(),
            self.resource_identifier.clone(),
            self.options.clone(),
            status,
        )
    }
}

fn rejection(
    definition: &DataOperationDefinition,
    references: Vec<String>,
    status: NcmpResponseStatus,
) -> Option<DataOperationResponse> {
    if references.is_empty() {
        return None;
    }
    Some(DataOperationResponse::new(
        definition.operation_id.clone(),
        references,
        definition.resource_identifier.clone(),
        definition.options.clone(),
        status,
    ))
}

/// Split a batch into operations per data plugin instance.
///
/// Consecutive entries with the same operation id share one handle list.
/// Unknown references and handles that are not READY are returned as
/// responses instead.
fn group_by_plugin(
    request: &DataOperationRequest,
    handles: &[Handle],
) -> (BTreeMap<String, Vec<PluginDataOperation>>, Vec<DataOperationResponse>) {
    let mut per_service: BTreeMap<String, Vec<PluginDataOperation>> = BTreeMap::new();
    let mut responses = Vec::new();

    for definition in &request.operations {
        let mut not_found = Vec::new();
        let mut not_ready = Vec::new();
        for reference in &definition.target_ids {
            let Some(handle) = handles.iter().find(|handle| handle.is_referenced_by(reference)) else {
                not_found.push(reference.clone());
                continue;
            };
            if handle.state() != CmHandleState::Ready {
                not_ready.push(reference.clone());
                continue;
            }
            let Ok(service) = resolve_plugin_instance(handle, OperationKind::Data) else {
                not_found.push(reference.clone());
                continue;
            };
            let operations = per_service.entry(service).or_default();
            let continues_last = operations
                .last()
                .map(|last| last.operation_id == definition.operation_id)
                .unwrap_or(false);
            if !continues_last {
                operations.push(PluginDataOperation::without_handles(definition));
            }
            if let Some(operation) = operations.last_mut() {
                operation.cm_handles.push(PluginOperationHandle::from(handle));
            }
        }
        responses.extend(rejection(definition, not_found, NcmpResponseStatus::CmHandlesNotFound));
        responses.extend(rejection(definition, not_ready, NcmpResponseStatus::CmHandlesNotReady));
    }
    (per_service, responses)
}

/// Data reads routed to each handle's data plugin.
#[derive(Clone)]
pub struct DataOperations {
    inventory: Arc<dyn InventoryStore>,
    transport: Arc<dyn PluginTransport>,
    publisher: Arc<dyn DataOperationEventPublisher>,
    config: DispatchConfig,
}

impl DataOperations {
    pub fn new(
        inventory: Arc<dyn InventoryStore>,
        transport: Arc<dyn PluginTransport>,
        publisher: Arc<dyn DataOperationEventPublisher>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            inventory,
            transport,
            publisher,
            config,
        }
    }

    /// Read resource data of one handle from its data plugin.
    ///
    /// The handle is re-fetched by id, falling back to alternate id.
    ///
    /// # Errors
    /// - `NotFound` if no handle matches the reference
    /// - `StateMismatch` if the handle is not READY; no call is made then
    /// - `PluginUnavailable` / `PluginRejected` from the transport
    pub async fn fetch_resource_data(
        &self,
        address: &ResourceAddress,
        options: Option<&str>,
        topic: Option<&str>,
        request_id: Option<&str>,
    ) -> Result<Value> {
        let handle = self.resolve_handle(&address.handle_reference).await?;
        if handle.state() != CmHandleState::Ready {
            return Err(Error::StateMismatch(format!(
                "Handle {} is {}, expected READY",
                handle.id,
                handle.state()
            )));
        }
        let service = resolve_plugin_instance(&handle, OperationKind::Data)?;

        let mut body = Map::new();
        body.insert("operation".to_string(), json!(READ));
        if let Some(request_id) = request_id {
            body.insert("requestId".to_string(), json!(request_id));
        }
        if !handle.module_set_tag.trim().is_empty() {
            body.insert("moduleSetTag".to_string(), json!(handle.module_set_tag));
        }
        body.insert("cmHandleProperties".to_string(), json!(handle.dmi_properties));

        let request = PluginRequest::new(
            service,
            &["ch", handle.id.as_str(), "data", "ds", address.datastore.as_str()],
            OperationKind::Data,
            Value::Object(body),
        )
        .with_query("resourceIdentifier", Some(address.resource_identifier.as_str()))
        .with_query("options", options)
        .with_query("topic", topic);

        self.transport.post(request).await
    }

    /// Check a batch request before it is accepted.
    ///
    /// # Errors
    /// - `InvalidInput` for a blank topic, a non-read operation, the
    ///   operational datastore, or an operation naming too many handles
    pub fn validate_batch(&self, topic: &str, request: &DataOperationRequest) -> Result<()> {
        if topic.trim().is_empty() {
            return Err(Error::InvalidInput("Topic cannot be empty".to_string()));
        }
        for definition in &request.operations {
            if definition.operation != READ {
                return Err(Error::InvalidInput(format!(
                    "{} operation not yet supported",
                    definition.operation
                )));
            }
            if definition.datastore == OPERATIONAL {
                return Err(Error::InvalidInput(format!(
                    "{} datastore is not supported",
                    definition.datastore
                )));
            }
            if definition.target_ids.len() > self.config.max_handles_per_operation {
                return Err(Error::InvalidInput(format!(
                    "Operation '{}' affects too many ({}) cm handles",
                    definition.operation_id,
                    definition.target_ids.len()
                )));
            }
        }
        Ok(())
    }

    /// Dispatch a batch, one request per data plugin instance.
    ///
    /// Outcomes are reported on `topic` correlated by `request_id`: unknown
    /// and not-ready references right away, and every handle of a plugin
    /// instance whose request failed. A failing plugin never affects the
    /// requests to other plugins.
    pub async fn dispatch_batch(
        &self,
        topic: &str,
        request_id: &str,
        request: &DataOperationRequest,
    ) -> Result<()> {
        self.validate_batch(topic, request)?;
        let handles = self
            .inventory
            .get_by_references(&request.distinct_references())
            .await?;
        let (per_service, rejected) = group_by_plugin(request, &handles);
        if !rejected.is_empty() {
            self.publish(topic, request_id, rejected).await;
        }

        debug!(
            "Dispatching request {} to {} plugin instances",
            request_id,
            per_service.len()
        );
        let sends = per_service
            .into_iter()
            .map(|(service, operations)| self.send_to_plugin(service, operations, topic, request_id));
        join_all(sends).await;
        Ok(())
    }

    /// Run [`dispatch_batch`](Self::dispatch_batch) in the background.
    pub fn spawn_dispatch_batch(
        &self,
        topic: String,
        request_id: String,
        request: DataOperationRequest,
    ) -> JoinHandle<()> {
        let operations = self.clone();
        tokio::spawn(async move {
            if let Err(e) = operations.dispatch_batch(&topic, &request_id, &request).await {
                warn!("Batch request {} failed: {}", request_id, e);
            }
        })
    }

    async fn send_to_plugin(
        &self,
        service: String,
        operations: Vec<PluginDataOperation>,
        topic: &str,
        request_id: &str,
    ) {
        let request = PluginRequest::new(
            service,
            &["data"],
            OperationKind::Data,
            json!({ "operations": operations }),
        )
        .with_query("requestId", Some(request_id))
        .with_query("topic", Some(topic));
        let target = request.target();

        if let Err(e) = self.transport.post(request).await {
            warn!("Batch request {} to {} failed: {}", request_id, target, e);
            let status = match e {
                Error::PluginUnavailable(_) => NcmpResponseStatus::DmiServiceNotResponding,
                _ => NcmpResponseStatus::UnableToReadResourceData,
            };
            let responses = operations
                .iter()
                .map(|operation| operation.failure(status))
                .collect();
            self.publish(topic, request_id, responses).await;
        }
    }

    async fn publish(&self, topic: &str, request_id: &str, responses: Vec<DataOperationResponse>) {
        let event = DataOperationEvent { responses };
        if let Err(e) = self.publisher.publish(topic, request_id, event).await {
            warn!("Failed to publish to {} for request {}: {}", topic, request_id, e);
        }
    }

    async fn resolve_handle(&self, reference: &str) -> Result<Handle> {
        let id = HandleId::new(reference)?;
        match self.inventory.get(&id).await {
            Err(Error::NotFound(_)) => {
                info!("No handle with id {}, trying alternate id", reference);
                self.inventory
                    .get_by_references(&[reference.to_string()])
                    .await?
                    .into_iter()
                    .next()
                    .ok_or_else(|| Error::NotFound(format!("Handle not found: {}", reference)))
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemoryEventPublisher;
    use crate::memory::MemoryTransport;
    use chrono::Utc;
    use cmsync_common::PluginBindings;
    use cmsync_storage::MemoryInventoryStore;

    fn ready(id: &str, service: &str) -> Handle {
        let mut handle = Handle::advised(HandleId::new(id).unwrap(), PluginBindings::common(service));
        handle
            .composite_state
            .transition_to(CmHandleState::Ready, Utc::now());
        handle
    }

    fn advised(id: &str, service: &str) -> Handle {
        Handle::advised(HandleId::new(id).unwrap(), PluginBindings::common(service))
    }

    fn definition(operation_id: &str, targets: &[&str]) -> DataOperationDefinition {
        DataOperationDefinition {
            operation: READ.to_string(),
            operation_id: operation_id.to_string(),
            datastore: "ncmp-datastore:passthrough-running".to_string(),
            options: None,
            resource_identifier: Some("/parent".to_string()),
            target_ids: targets.iter().map(|target| target.to_string()).collect(),
        }
    }

    struct Fixture {
        transport: MemoryTransport,
        publisher: MemoryEventPublisher,
        operations: DataOperations,
    }

    fn fixture(handles: Vec<Handle>) -> Fixture {
        let transport = MemoryTransport::new();
        let publisher = MemoryEventPublisher::new();
        let operations = DataOperations::new(
            Arc::new(MemoryInventoryStore::with_handles(handles)),
            Arc::new(transport.clone()),
            Arc::new(publisher.clone()),
            DispatchConfig::default(),
        );
        Fixture {
            transport,
            publisher,
            operations,
        }
    }

    #[tokio::test]
    async fn test_fetch_resource_data_requires_ready() {
        let fixture = fixture(vec![advised("ch-1", "dmi-1")]);
        let address = ResourceAddress::new(PASSTHROUGH_OPERATIONAL, "ch-1", "/");

        let result = fixture
            .operations
            .fetch_resource_data(&address, None, None, None)
            .await;
        assert!(matches!(result, Err(Error::StateMismatch(_))));
        assert!(fixture.transport.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_resource_data_builds_request() {
        let fixture = fixture(vec![ready("ch-1", "dmi-1").with_alternate_id("fdn=1")]);
        fixture
            .transport
            .route(
                "dmi-1/ch/ch-1/data/ds/ncmp-datastore:passthrough-operational",
                json!({"interfaces": {}}),
            )
            .await;
        let address = ResourceAddress::new(PASSTHROUGH_OPERATIONAL, "fdn=1", "interfaces");

        let data = fixture
            .operations
            .fetch_resource_data(&address, Some("(fields=name)"), None, Some("req-1"))
            .await
            .unwrap();
        assert_eq!(data, json!({"interfaces": {}}));

        let calls = fixture.transport.calls().await;
        assert_eq!(calls[0].query_value("resourceIdentifier"), Some("interfaces"));
        assert_eq!(calls[0].query_value("options"), Some("(fields=name)"));
        assert_eq!(calls[0].query_value("topic"), None);
        assert_eq!(calls[0].body["requestId"], "req-1");
        assert_eq!(calls[0].body["operation"], "read");
    }

    #[tokio::test]
    async fn test_unknown_handle_is_not_found() {
        let fixture = fixture(vec![]);
        let address = ResourceAddress::new(PASSTHROUGH_OPERATIONAL, "ch-x", "/");
        let result = fixture
            .operations
            .fetch_resource_data(&address, None, None, None)
            .await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_batch_with_one_unreachable_plugin() {
        let fixture = fixture(vec![ready("ch-a1", "dmi-a"), ready("ch-b1", "dmi-b")]);
        fixture.transport.route("dmi-a/data", Value::Null).await;
        fixture.transport.set_unreachable("dmi-b", true).await;
        let request = DataOperationRequest {
            operations: vec![definition("op-1", &["ch-a1", "ch-b1"])],
        };

        fixture
            .operations
            .dispatch_batch("client-topic", "req-1", &request)
            .await
            .unwrap();

        assert_eq!(fixture.transport.call_count("dmi-a/data").await, 1);
        assert_eq!(fixture.transport.call_count("dmi-b/data").await, 1);

        let published = fixture.publisher.published().await;
        assert_eq!(published.len(), 1);
        let (topic, request_id, event) = &published[0];
        assert_eq!(topic, "client-topic");
        assert_eq!(request_id, "req-1");
        assert_eq!(
            event.ids_with_status(NcmpResponseStatus::DmiServiceNotResponding),
            vec!["ch-b1".to_string()]
        );
        assert_eq!(event.responses[0].operation_id, "op-1");
    }

    #[tokio::test]
    async fn test_batch_rejected_plugin_reports_unable_to_read() {
        let fixture = fixture(vec![ready("ch-a1", "dmi-a")]);
        fixture.transport.set_rejecting("dmi-a", true).await;
        let request = DataOperationRequest {
            operations: vec![definition("op-1", &["ch-a1"])],
        };

        fixture
            .operations
            .dispatch_batch("client-topic", "req-2", &request)
            .await
            .unwrap();

        let published = fixture.publisher.published().await;
        assert_eq!(
            published[0]
                .2
                .ids_with_status(NcmpResponseStatus::UnableToReadResourceData),
            vec!["ch-a1".to_string()]
        );
    }

    #[tokio::test]
    async fn test_batch_reports_not_found_and_not_ready() {
        let fixture = fixture(vec![ready("ch-1", "dmi-1"), advised("ch-2", "dmi-1")]);
        fixture.transport.route("dmi-1/data", Value::Null).await;
        let request = DataOperationRequest {
            operations: vec![definition("op-1", &["ch-1", "ch-2", "ch-9"])],
        };

        fixture
            .operations
            .dispatch_batch("client-topic", "req-3", &request)
            .await
            .unwrap();

        let published = fixture.publisher.published().await;
        assert_eq!(published.len(), 1);
        let event = &published[0].2;
        assert_eq!(
            event.ids_with_status(NcmpResponseStatus::CmHandlesNotFound),
            vec!["ch-9".to_string()]
        );
        assert_eq!(
            event.ids_with_status(NcmpResponseStatus::CmHandlesNotReady),
            vec!["ch-2".to_string()]
        );

        let calls = fixture.transport.calls().await;
        assert_eq!(calls.len(), 1);
        let handles = &calls[0].body["operations"][0]["cmHandles"];
        assert_eq!(handles.as_array().map(Vec::len), Some(1));
        assert_eq!(handles[0]["id"], "ch-1");
    }

    #[tokio::test]
    async fn test_batch_keeps_operation_grouping() {
        let fixture = fixture(vec![
            ready("ch-1", "dmi-1"),
            ready("ch-2", "dmi-1"),
            ready("ch-3", "dmi-1").with_alternate_id("fdn=3"),
        ]);
        fixture.transport.route("dmi-1/data", Value::Null).await;
        let request = DataOperationRequest {
            operations: vec![definition("op-1", &["ch-1", "ch-2"]), definition("op-2", &["fdn=3"])],
        };

        fixture
            .operations
            .dispatch_batch("client-topic", "req-4", &request)
            .await
            .unwrap();

        let calls = fixture.transport.calls().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].query_value("requestId"), Some("req-4"));
        let operations = calls[0].body["operations"].as_array().cloned().unwrap();
        assert_eq!(operations.len(), 2);
        assert_eq!(operations[0]["operationId"], "op-1");
        assert_eq!(operations[0]["cmHandles"].as_array().map(Vec::len), Some(2));
        assert_eq!(operations[1]["cmHandles"][0]["id"], "ch-3");
        assert!(fixture.publisher.published().await.is_empty());
    }

    #[tokio::test]
    async fn test_batch_validation() {
        let fixture = fixture(vec![]);
        let targets: Vec<String> = (0..201).map(|i| format!("ch-{}", i)).collect();
        let target_refs: Vec<&str> = targets.iter().map(String::as_str).collect();
        let too_large = DataOperationRequest {
            operations: vec![definition("op-1", &target_refs)],
        };
        assert!(matches!(
            fixture.operations.dispatch_batch("t", "r", &too_large).await,
            Err(Error::InvalidInput(_))
        ));

        let mut write = definition("op-1", &["ch-1"]);
        write.operation = "create".to_string();
        let request = DataOperationRequest {
            operations: vec![write],
        };
        assert!(fixture.operations.validate_batch("t", &request).is_err());

        let request = DataOperationRequest {
            operations: vec![definition("op-1", &["ch-1"])],
        };
        assert!(fixture.operations.validate_batch(" ", &request).is_err());
        assert!(fixture.transport.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_spawn_dispatch_batch() {
        let fixture = fixture(vec![ready("ch-1", "dmi-1")]);
        fixture.transport.route("dmi-1/data", Value::Null).await;
        let request = DataOperationRequest {
            operations: vec![definition("op-1", &["ch-1"])],
        };

        fixture
            .operations
            .spawn_dispatch_batch("client-topic".to_string(), "req-5".to_string(), request)
            .await
            .unwrap();
        assert_eq!(fixture.transport.call_count("dmi-1/data").await, 1);
    }
}
