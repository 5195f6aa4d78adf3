//! Dispatch configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::resolver::OperationKind;

/// Configuration for plugin dispatch and the async request path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Path prefix of the plugin REST API, between service root and `v1`.
    pub dmi_base_path: String,
    /// Timeout for schema (model) calls, in milliseconds.
    pub model_timeout_ms: u64,
    /// Timeout for data calls, in milliseconds.
    pub data_timeout_ms: u64,
    /// Largest number of handle references one batch operation may name.
    pub max_handles_per_operation: usize,
    /// Number of tasks the async executor runs at once.
    pub executor_width: usize,
    /// Deadline for one asynchronous request, in milliseconds.
    pub async_task_timeout_ms: u64,
}

impl DispatchConfig {
    /// Network timeout for an operation kind.
    pub fn timeout_for(&self, kind: OperationKind) -> Duration {
        match kind {
            OperationKind::Schema => Duration::from_millis(self.model_timeout_ms),
            OperationKind::Data => Duration::from_millis(self.data_timeout_ms),
        }
    }

    pub fn async_task_timeout(&self) -> Duration {
        Duration::from_millis(self.async_task_timeout_ms)
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            dmi_base_path: "dmi".to_string(),
            model_timeout_ms: 30_000,
            data_timeout_ms: 30_000,
            max_handles_per_operation: 200,
            executor_width: 10,
            async_task_timeout_ms: 60_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: DispatchConfig =
            serde_json::from_str(r#"{"data_timeout_ms": 5000}"#).unwrap();
        assert_eq!(config.timeout_for(OperationKind::Data), Duration::from_secs(5));
        assert_eq!(config.timeout_for(OperationKind::Schema), Duration::from_secs(30));
        assert_eq!(config.max_handles_per_operation, 200);
        assert_eq!(config.executor_width, 10);
    }
}
