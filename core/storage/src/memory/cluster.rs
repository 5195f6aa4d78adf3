//! Single-instance cluster primitives.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use cmsync_common::{HandleId, Result};

use crate::cluster::{ClusterLock, TtlMap, WorkQueue};

/// Bounded in-memory FIFO.
#[derive(Clone)]
pub struct MemoryWorkQueue {
    items: Arc<Mutex<VecDeque<HandleId>>>,
    capacity: usize,
}

impl MemoryWorkQueue {
    /// Queue with no practical size limit.
    pub fn new() -> Self {
        Self::with_capacity(usize::MAX)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: Arc::new(Mutex::new(VecDeque::new())),
            capacity,
        }
    }
}

impl Default for MemoryWorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkQueue for MemoryWorkQueue {
    async fn offer(&self, id: HandleId) -> Result<bool> {
        let mut items = self.items.lock().await;
        if items.len() >= self.capacity {
            return Ok(false);
        }
        items.push_back(id);
        Ok(true)
    }

    async fn drain_to(&self, max: usize) -> Result<Vec<HandleId>> {
        let mut items = self.items.lock().await;
        let count = max.min(items.len());
        Ok(items.drain(..count).collect())
    }

    async fn is_empty(&self) -> Result<bool> {
        Ok(self.items.lock().await.is_empty())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.items.lock().await.len())
    }
}

/// In-memory named locks with lease expiry.
#[derive(Clone, Default)]
pub struct MemoryClusterLock {
    held: Arc<Mutex<HashMap<String, Instant>>>,
}

impl MemoryClusterLock {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ClusterLock for MemoryClusterLock {
    async fn try_lock(&self, name: &str, lease: Duration) -> Result<bool> {
        let mut held = self.held.lock().await;
        let now = Instant::now();
        match held.get(name) {
            Some(expires_at) if *expires_at > now => Ok(false),
            _ => {
                held.insert(name.to_string(), now + lease);
                Ok(true)
            }
        }
    }

    async fn unlock(&self, name: &str) -> Result<()> {
        self.held.lock().await.remove(name);
        Ok(())
    }
}

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// In-memory map with per-entry expiry.
///
/// Expired entries are purged lazily: an access purges its own key, and
/// every insert sweeps the whole map.
#[derive(Clone)]
pub struct MemoryTtlMap<V> {
    entries: Arc<Mutex<HashMap<String, Entry<V>>>>,
}

impl<V> MemoryTtlMap<V> {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        entries.retain(|_, entry| entry.expires_at > now);
        entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl<V> Default for MemoryTtlMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

fn purge_expired<V>(entries: &mut HashMap<String, Entry<V>>, key: &str, now: Instant) {
    if entries
        .get(key)
        .map(|entry| entry.expires_at <= now)
        .unwrap_or(false)
    {
        entries.remove(key);
    }
}

#[async_trait]
impl<V> TtlMap<V> for MemoryTtlMap<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn put_if_absent(&self, key: &str, value: V, ttl: Duration) -> Result<Option<V>> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        entries.retain(|_, entry| entry.expires_at > now);
        if let Some(existing) = entries.get(key) {
            return Ok(Some(existing.value.clone()));
        }
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: now + ttl,
            },
        );
        Ok(None)
    }

    async fn replace(&self, key: &str, value: V) -> Result<Option<V>> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        purge_expired(&mut entries, key, now);
        Ok(entries
            .get_mut(key)
            .map(|entry| std::mem::replace(&mut entry.value, value)))
    }

    async fn remove(&self, key: &str) -> Result<Option<V>> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        purge_expired(&mut entries, key, now);
        Ok(entries.remove(key).map(|entry| entry.value))
    }

    async fn get(&self, key: &str) -> Result<Option<V>> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        purge_expired(&mut entries, key, now);
        Ok(entries.get(key).map(|entry| entry.value.clone()))
    }
}
