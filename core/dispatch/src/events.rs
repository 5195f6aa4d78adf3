//! Client-topic notifications for data operations.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use cmsync_common::Result;

/// Outcome code reported per operation and handle group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NcmpResponseStatus {
    Success,
    CmHandlesNotFound,
    CmHandlesNotReady,
    DmiServiceNotResponding,
    UnableToReadResourceData,
}

impl NcmpResponseStatus {
    pub fn code(&self) -> u16 {
        match self {
            NcmpResponseStatus::Success => 0,
            NcmpResponseStatus::CmHandlesNotFound => 100,
            NcmpResponseStatus::CmHandlesNotReady => 101,
            NcmpResponseStatus::DmiServiceNotResponding => 102,
            NcmpResponseStatus::UnableToReadResourceData => 103,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            NcmpResponseStatus::Success => "Successfully applied changes",
            NcmpResponseStatus::CmHandlesNotFound => "cm handle reference(s) not found",
            NcmpResponseStatus::CmHandlesNotReady => "cm handle(s) not ready",
            NcmpResponseStatus::DmiServiceNotResponding => "dmi plugin service is not responding",
            NcmpResponseStatus::UnableToReadResourceData => {
                "dmi plugin service is not able to read resource data"
            }
        }
    }
}

/// Result of one operation for a group of handle references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataOperationResponse {
    pub operation_id: String,
    pub ids: Vec<String>,
    #[serde(default)]
    pub resource_identifier: Option<String>,
    #[serde(default)]
    pub options: Option<String>,
    pub status_code: u16,
    pub status_message: String,
}

impl DataOperationResponse {
    pub fn new(
        operation_id: impl Into<String>,
        ids: Vec<String>,
        resource_identifier: Option<String>,
        options: Option<String>,
        status: NcmpResponseStatus,
    ) -> Self {
        Self {
            operation_id: operation_id.into(),
            ids,
            resource_identifier,
            options,
            status_code: status.code(),
            status_message: status.message().to_string(),
        }
    }
}

/// Event published to a client topic, correlated by request id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataOperationEvent {
    pub responses: Vec<DataOperationResponse>,
}

impl DataOperationEvent {
    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }

    /// Handle references reported with `status`, in report order.
    pub fn ids_with_status(&self, status: NcmpResponseStatus) -> Vec<String> {
        self.responses
            .iter()
            .filter(|response| response.status_code == status.code())
            .flat_map(|response| response.ids.iter().cloned())
            .collect()
    }
}

/// Sink for client-topic notifications.
#[async_trait]
pub trait DataOperationEventPublisher: Send + Sync {
    async fn publish(&self, topic: &str, request_id: &str, event: DataOperationEvent) -> Result<()>;
}

/// Records published events in memory and logs them.
#[derive(Clone, Default)]
pub struct MemoryEventPublisher {
    published: Arc<Mutex<Vec<(String, String, DataOperationEvent)>>>,
}

impl MemoryEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// All published `(topic, request_id, event)` triples.
    pub async fn published(&self) -> Vec<(String, String, DataOperationEvent)> {
        self.published.lock().await.clone()
    }
}

#[async_trait]
impl DataOperationEventPublisher for MemoryEventPublisher {
    async fn publish(&self, topic: &str, request_id: &str, event: DataOperationEvent) -> Result<()> {
        info!(
            "Publishing {} data operation responses to {} for request {}",
            event.responses.len(),
            topic,
            request_id
        );
        self.published
            .lock()
            .await
            .push((topic.to_string(), request_id.to_string(), event));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(NcmpResponseStatus::Success.code(), 0);
        assert_eq!(NcmpResponseStatus::CmHandlesNotFound.code(), 100);
        assert_eq!(NcmpResponseStatus::CmHandlesNotReady.code(), 101);
        assert_eq!(NcmpResponseStatus::DmiServiceNotResponding.code(), 102);
        assert_eq!(NcmpResponseStatus::UnableToReadResourceData.code(), 103);
    }

    #[test]
    fn test_response_wire_format() {
        let response = DataOperationResponse::new(
            "op-1",
            vec!["ch-1".to_string()],
            Some("/parent".to_string()),
            None,
            NcmpResponseStatus::CmHandlesNotReady,
        );
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["operationId"], "op-1");
        assert_eq!(json["statusCode"], 101);
        assert_eq!(json["statusMessage"], "cm handle(s) not ready");
        assert_eq!(json["resourceIdentifier"], "/parent");
    }

    #[tokio::test]
    async fn test_memory_publisher_records() {
        let publisher = MemoryEventPublisher::new();
        let event = DataOperationEvent {
            responses: vec![DataOperationResponse::new(
                "op-1",
                vec!["ch-9".to_string()],
                None,
                None,
                NcmpResponseStatus::CmHandlesNotFound,
            )],
        };
        publisher.publish("client-topic", "req-1", event).await.unwrap();

        let published = publisher.published().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "client-topic");
        assert_eq!(
            published[0].2.ids_with_status(NcmpResponseStatus::CmHandlesNotFound),
            vec!["ch-9".to_string()]
        );
    }
}
