//! In-memory plugin transport.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use cmsync_common::{Error, Result};

use crate::transport::{PluginRequest, PluginTransport};

#[derive(Default)]
struct Routes {
    responses: HashMap<String, Value>,
    unreachable: HashSet<String>,
    rejecting: HashSet<String>,
    rejected_queries: HashSet<(String, String)>,
    calls: Vec<PluginRequest>,
}

/// Plugin transport answering from canned responses.
///
/// Responses are keyed by [`PluginRequest::target`]. Services can be marked
/// unreachable (`PluginUnavailable`) or rejecting (`PluginRejected`), and
/// single query values can be rejected. Every request is recorded.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    routes: Arc<RwLock<Routes>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer requests to `target` with `response`.
    pub async fn route(&self, target: impl Into<String>, response: Value) {
        self.routes
            .write()
            .await
            .responses
            .insert(target.into(), response);
    }

    pub async fn set_unreachable(&self, service: &str, unreachable: bool) {
        let mut routes = self.routes.write().await;
        if unreachable {
            routes.unreachable.insert(service.to_string());
        } else {
            routes.unreachable.remove(service);
        }
    }

    pub async fn set_rejecting(&self, service: &str, rejecting: bool) {
        let mut routes = self.routes.write().await;
        if rejecting {
            routes.rejecting.insert(service.to_string());
        } else {
            routes.rejecting.remove(service);
        }
    }

    /// Reject any request carrying query parameter `name` with `value`.
    pub async fn reject_query(&self, name: &str, value: &str) {
        self.routes
            .write()
            .await
            .rejected_queries
            .insert((name.to_string(), value.to_string()));
    }

    /// All requests received so far.
    pub async fn calls(&self) -> Vec<PluginRequest> {
        self.routes.read().await.calls.clone()
    }

    /// Number of requests received for `target`.
    pub async fn call_count(&self, target: &str) -> usize {
        self.routes
            .read()
            .await
            .calls
            .iter()
            .filter(|call| call.target() == target)
            .count()
    }
}

#[async_trait]
impl PluginTransport for MemoryTransport {
    async fn post(&self, request: PluginRequest) -> Result<Value> {
        let target = request.target();
        debug!("POST {}", target);
        let mut routes = self.routes.write().await;
        let service = request.service.clone();
        let rejected_query = request
            .query
            .iter()
            .any(|param| routes.rejected_queries.contains(param));
        routes.calls.push(request);

        if routes.unreachable.contains(&service) {
            return Err(Error::PluginUnavailable(format!("Failed to reach {}", target)));
        }
        if routes.rejecting.contains(&service) || rejected_query {
            return Err(Error::PluginRejected(format!("{} answered 500", target)));
        }
        routes
            .responses
            .get(&target)
            .cloned()
            .ok_or_else(|| Error::PluginRejected(format!("{} answered 404", target)))
    }
}
