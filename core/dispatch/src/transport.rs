//! Plugin transport abstraction.

use async_trait::async_trait;
use serde_json::Value;

use cmsync_common::Result;

use crate::resolver::OperationKind;

/// One POST to a plugin service.
#[derive(Debug, Clone, PartialEq)]
pub struct PluginRequest {
    /// Plugin service root, e.g. `http://dmi-1:8080`.
    pub service: String,
    /// Path segments below the versioned API root, unencoded.
    pub path: Vec<String>,
    /// Query parameters; parameters without a value are left out by the caller.
    pub query: Vec<(String, String)>,
    pub kind: OperationKind,
    pub body: Value,
}

impl PluginRequest {
    pub fn new(service: impl Into<String>, path: &[&str], kind: OperationKind, body: Value) -> Self {
        Self {
            service: service.into(),
            path: path.iter().map(|segment| segment.to_string()).collect(),
            query: Vec::new(),
            kind,
            body,
        }
    }

    /// Add a query parameter if it has a value.
    pub fn with_query(mut self, name: &str, value: Option<&str>) -> Self {
        if let Some(value) = value {
            self.query.push((name.to_string(), value.to_string()));
        }
        self
    }

    /// `service/path` for logs and routing.
    pub fn target(&self) -> String {
        format!("{}/{}", self.service, self.path.join("/"))
    }

    /// Value of a query parameter.
    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Sends requests to plugin services.
///
/// Implementations bound every call with the timeout of its operation kind.
///
/// # Errors
/// - `PluginUnavailable` when the plugin cannot be reached or times out
/// - `PluginRejected` when the plugin answers with a non-success status
#[async_trait]
pub trait PluginTransport: Send + Sync {
    async fn post(&self, request: PluginRequest) -> Result<Value>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_target_and_query() {
        let request = PluginRequest::new(
            "http://dmi-1",
            &["ch", "ch-1", "modules"],
            OperationKind::Schema,
            json!({}),
        )
        .with_query("topic", None)
        .with_query("requestId", Some("r-1"));

        assert_eq!(request.target(), "http://dmi-1/ch/ch-1/modules");
        assert_eq!(request.query.len(), 1);
        assert_eq!(request.query_value("requestId"), Some("r-1"));
        assert_eq!(request.query_value("topic"), None);
    }
}
