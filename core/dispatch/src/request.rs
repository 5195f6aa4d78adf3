//! Request paths that can answer asynchronously on a client topic.

use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use cmsync_common::{Error, Result};

use crate::config::DispatchConfig;
use crate::data::{DataOperationRequest, DataOperations, ResourceAddress};
use crate::executor::BoundedExecutor;

/// Answer to a resource data request.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestOutcome {
    /// Data read synchronously.
    Data(Value),
    /// Accepted; the plugin answers on the client topic under this id.
    Accepted { request_id: String },
}

/// Entry point for ad-hoc and batch data requests.
#[derive(Clone)]
pub struct RequestHandler {
    data: DataOperations,
    executor: BoundedExecutor,
    config: DispatchConfig,
}

impl RequestHandler {
    pub fn new(data: DataOperations, config: DispatchConfig) -> Self {
        Self {
            data,
            executor: BoundedExecutor::new(config.executor_width),
            config,
        }
    }

    pub fn executor(&self) -> &BoundedExecutor {
        &self.executor
    }

    /// Read resource data of one handle.
    ///
    /// Without a topic the data is read and returned. With a topic a request
    /// id is generated, the read runs on the bounded executor and the call
    /// returns immediately.
    pub async fn execute_request(
        &self,
        address: ResourceAddress,
        options: Option<String>,
        topic: Option<String>,
    ) -> Result<RequestOutcome> {
        let Some(topic) = topic else {
            let data = self
                .data
                .fetch_resource_data(&address, options.as_deref(), None, None)
                .await?;
            return Ok(RequestOutcome::Data(data));
        };
        if topic.trim().is_empty() {
            return Err(Error::InvalidInput("Topic cannot be empty".to_string()));
        }

        let request_id = Uuid::new_v4().to_string();
        let data = self.data.clone();
        let task_request_id = request_id.clone();
        self.executor.spawn(
            format!("resource data request {}", request_id),
            async move {
                data.fetch_resource_data(
                    &address,
                    options.as_deref(),
                    Some(&topic),
                    Some(&task_request_id),
                )
                .await
            },
            self.config.async_task_timeout(),
        );
        debug!("Received async request with id {}", request_id);
        Ok(RequestOutcome::Accepted { request_id })
    }

    /// Accept a batch request and dispatch it in the background.
    ///
    /// # Errors
    /// - `InvalidInput` if the request fails validation; nothing is dispatched
    pub fn execute_batch_request(
        &self,
        topic: &str,
        request: DataOperationRequest,
    ) -> Result<String> {
        self.data.validate_batch(topic, &request)?;
        let request_id = Uuid::new_v4().to_string();
        self.data
            .spawn_dispatch_batch(topic.to_string(), request_id.clone(), request);
        Ok(request_id)
    }
}
