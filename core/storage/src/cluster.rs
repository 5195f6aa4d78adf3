//! Cluster-shared primitives used to coordinate identical service instances.
//!
//! Any consistent distributed cache satisfies these contracts; the
//! in-memory implementations cover single-instance deployments.

use async_trait::async_trait;
use std::time::Duration;

use cmsync_common::{HandleId, Result};

/// Named mutual-exclusion lock with a lease.
///
/// A holder that never unlocks loses the lock once the lease expires, so a
/// crashed instance cannot block the cluster forever.
#[async_trait]
pub trait ClusterLock: Send + Sync {
    /// Try to take the lock without waiting.
    ///
    /// Returns `true` if this caller now holds the lock.
    async fn try_lock(&self, name: &str, lease: Duration) -> Result<bool>;

    /// Release the lock. Releasing a lock that is not held is a no-op.
    async fn unlock(&self, name: &str) -> Result<()>;
}

/// Shared FIFO of handle ids waiting for module sync.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Append an id. Returns `false` if the queue refused it (full).
    async fn offer(&self, id: HandleId) -> Result<bool>;

    /// Remove and return up to `max` ids from the head.
    async fn drain_to(&self, max: usize) -> Result<Vec<HandleId>>;

    async fn is_empty(&self) -> Result<bool>;

    async fn len(&self) -> Result<usize>;
}

/// Shared map whose entries expire after a time-to-live.
#[async_trait]
pub trait TtlMap<V>: Send + Sync
where
    V: Clone + Send + Sync + 'static,
{
    /// Insert if no live entry exists.
    ///
    /// Returns the previous live value, or `None` if this call inserted.
    async fn put_if_absent(&self, key: &str, value: V, ttl: Duration) -> Result<Option<V>>;

    /// Replace the value of a live entry, keeping its expiry.
    ///
    /// Returns the previous value, or `None` if there was no live entry.
    async fn replace(&self, key: &str, value: V) -> Result<Option<V>>;

    /// Remove an entry, returning its value if it was live.
    async fn remove(&self, key: &str) -> Result<Option<V>>;

    /// Value of a live entry.
    async fn get(&self, key: &str) -> Result<Option<V>>;
}
