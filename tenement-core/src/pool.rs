//! Tenant Connection Pool
//!
//! Maps decorated tenant names to cached connection handles. A handle is
//! established on first use, reused afterwards, and discarded when
//! establishment fails so the next use tries again.
//!
//! # Concurrency
//!
//! The registry map sits behind a short, never-awaited `parking_lot` lock.
//! Each key owns a slot with its own async gate, so first use of one tenant
//! never waits on another tenant being provisioned. Within a slot the gate
//! makes establishment at-most-once; a slot that failed is retired and
//! anyone still queued on it moves on to a fresh slot.

use crate::driver::{ConnectionDriver, ConnectionHandle};
use crate::error::DriverError;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tenement_config::ConnectionSpec;
use tracing::{debug, info, warn};

/// Registry key for a decorated database name.
///
/// Keys are memoized by the pool, so every lookup of the same name shares
/// one allocation for the life of the pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolKey(Arc<str>);

impl PoolKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether both keys come from the same memoized entry.
    pub fn same_entry(&self, other: &PoolKey) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

struct Entry {
    handle: Arc<dyn ConnectionHandle>,
    established_at: DateTime<Utc>,
}

#[derive(Default)]
struct Slot {
    entry: RwLock<Option<Entry>>,
    gate: tokio::sync::Mutex<()>,
    retired: AtomicBool,
}

impl Slot {
    fn ready(&self) -> Option<Arc<dyn ConnectionHandle>> {
        self.entry.read().as_ref().map(|e| Arc::clone(&e.handle))
    }

    fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    fn store(&self, handle: Arc<dyn ConnectionHandle>) {
        *self.entry.write() = Some(Entry {
            handle,
            established_at: Utc::now(),
        });
    }

    fn take(&self) -> Option<Arc<dyn ConnectionHandle>> {
        self.entry.write().take().map(|e| e.handle)
    }
}

enum Acquired {
    Ready(Arc<dyn ConnectionHandle>),
    Retired,
}

/// Tenant connection pool
pub struct ConnectionPool {
    driver: Arc<dyn ConnectionDriver>,
    default_spec: ConnectionSpec,
    default: Slot,
    keys: Mutex<HashMap<String, PoolKey>>,
    slots: Mutex<HashMap<PoolKey, Arc<Slot>>>,
    established: AtomicU64,
}

impl ConnectionPool {
    /// Create a pool that establishes handles through `driver`.
    ///
    /// `default_spec` describes the shared default connection used by the
    /// base model, excluded models and administrative statements.
    pub fn new(driver: Arc<dyn ConnectionDriver>, default_spec: ConnectionSpec) -> Self {
        Self {
            driver,
            default_spec,
            default: Slot::default(),
            keys: Mutex::new(HashMap::new()),
            slots: Mutex::new(HashMap::new()),
            established: AtomicU64::new(0),
        }
    }

    pub fn default_spec(&self) -> &ConnectionSpec {
        &self.default_spec
    }

    /// Stable key for a decorated database name, created on first reference.
    pub fn pool_key_for(&self, database: &str) -> PoolKey {
        let mut keys = self.keys.lock();
        if let Some(key) = keys.get(database) {
            return key.clone();
        }
        let key = PoolKey(Arc::from(database));
        keys.insert(database.to_string(), key.clone());
        key
    }

    /// Get the handle for `spec.database`, establishing it if needed.
    ///
    /// A failed establishment leaves no entry behind: the next call for the
    /// same database starts from scratch.
    pub async fn use_spec(
        &self,
        spec: &ConnectionSpec,
    ) -> Result<Arc<dyn ConnectionHandle>, DriverError> {
        self.use_spec_as(&spec.database, spec).await
    }

    /// [`use_spec`](Self::use_spec) registered under `name` rather than the
    /// database name, for tenants that share a database.
    pub async fn use_spec_as(
        &self,
        name: &str,
        spec: &ConnectionSpec,
    ) -> Result<Arc<dyn ConnectionHandle>, DriverError> {
        let key = self.pool_key_for(name);

        loop {
            let slot = self.slot_for(&key);
            match self.acquire(&slot, spec, true).await {
                Ok(Acquired::Ready(handle)) => {
                    handle.enable_query_cache();
                    return Ok(handle);
                }
                Ok(Acquired::Retired) => continue,
                Err(err) => {
                    self.unregister(&key, &slot);
                    warn!(database = %key, error = %err, "Failed to establish tenant connection");
                    return Err(err);
                }
            }
        }
    }

    /// Shared default connection, established lazily.
    pub async fn default_handle(&self) -> Result<Arc<dyn ConnectionHandle>, DriverError> {
        match self.acquire(&self.default, &self.default_spec, false).await? {
            Acquired::Ready(handle) => Ok(handle),
            Acquired::Retired => Err(DriverError::connection("default connection retired")),
        }
    }

    /// Open a handle outside the pool.
    ///
    /// Used by the root connection mechanism for administrative work, which
    /// must not disturb pooled per-tenant handles.
    pub async fn establish_unpooled(
        &self,
        spec: &ConnectionSpec,
    ) -> Result<Arc<dyn ConnectionHandle>, DriverError> {
        let handle = self.driver.establish(spec).await?;
        self.established.fetch_add(1, Ordering::Relaxed);
        Ok(handle)
    }

    /// Pooled handle for a key, without establishing one.
    pub fn lookup(&self, key: &PoolKey) -> Option<Arc<dyn ConnectionHandle>> {
        let slot = self.slots.lock().get(key).cloned()?;
        slot.ready()
    }

    /// Whether a handle is pooled for the decorated database name.
    pub fn contains(&self, database: &str) -> bool {
        let key = self.pool_key_for(database);
        self.lookup(&key).is_some()
    }

    /// Clear cached query results for a tenant's handle and for the default
    /// handle.
    pub fn clear_query_cache(&self, database: &str) {
        let key = self.pool_key_for(database);
        if let Some(handle) = self.lookup(&key) {
            handle.clear_query_cache();
        }
        if let Some(handle) = self.default.ready() {
            handle.clear_query_cache();
        }
    }

    /// Discard the pooled handle for a key. Returns whether one was pooled.
    pub async fn remove(&self, key: &PoolKey) -> bool {
        let slot = self.slots.lock().remove(key);
        match slot {
            Some(slot) => {
                let removed = Self::retire(&slot).await;
                debug!(database = %key, "Removed pooled connection");
                removed
            }
            None => false,
        }
    }

    /// Discard every pooled handle, including the default one.
    pub async fn clear_all(&self) {
        let slots: Vec<Arc<Slot>> = self.slots.lock().drain().map(|(_, slot)| slot).collect();
        let count = slots.len();

        for slot in slots {
            Self::retire(&slot).await;
        }

        {
            let _gate = self.default.gate.lock().await;
            self.default.take();
        }

        info!(count, "Cleared all pooled connections");
    }

    /// Snapshot of pool contents
    pub fn stats(&self) -> PoolStats {
        let slots: Vec<(PoolKey, Arc<Slot>)> = self
            .slots
            .lock()
            .iter()
            .map(|(k, s)| (k.clone(), Arc::clone(s)))
            .collect();

        let mut entries: Vec<PoolEntryInfo> = slots
            .into_iter()
            .filter_map(|(key, slot)| {
                slot.entry.read().as_ref().map(|e| PoolEntryInfo {
                    database: key.to_string(),
                    established_at: e.established_at,
                })
            })
            .collect();
        entries.sort_by(|a, b| a.database.cmp(&b.database));

        PoolStats {
            pooled: entries.len(),
            known_keys: self.keys.lock().len(),
            default_connected: self.default.ready().is_some(),
            total_established: self.established.load(Ordering::Relaxed),
            entries,
        }
    }

    fn slot_for(&self, key: &PoolKey) -> Arc<Slot> {
        let mut slots = self.slots.lock();
        Arc::clone(slots.entry(key.clone()).or_default())
    }

    fn unregister(&self, key: &PoolKey, slot: &Arc<Slot>) {
        let mut slots = self.slots.lock();
        if slots.get(key).is_some_and(|current| Arc::ptr_eq(current, slot)) {
            slots.remove(key);
        }
    }

    async fn acquire(
        &self,
        slot: &Slot,
        spec: &ConnectionSpec,
        retire_on_failure: bool,
    ) -> Result<Acquired, DriverError> {
        if let Some(handle) = slot.ready() {
            return Ok(Acquired::Ready(handle));
        }

        let _gate = slot.gate.lock().await;
        if slot.is_retired() {
            return Ok(Acquired::Retired);
        }
        if let Some(handle) = slot.ready() {
            return Ok(Acquired::Ready(handle));
        }

        debug!(database = %spec.database, "Establishing connection");
        match self.driver.establish(spec).await {
            Ok(handle) => {
                self.established.fetch_add(1, Ordering::Relaxed);
                slot.store(Arc::clone(&handle));
                Ok(Acquired::Ready(handle))
            }
            Err(err) => {
                if retire_on_failure {
                    slot.retired.store(true, Ordering::Release);
                }
                Err(err)
            }
        }
    }

    async fn retire(slot: &Slot) -> bool {
        let _gate = slot.gate.lock().await;
        slot.retired.store(true, Ordering::Release);
        slot.take().is_some()
    }
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("default_spec", &self.default_spec)
            .field("pooled", &self.slots.lock().len())
            .finish()
    }
}

/// Pool statistics
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    /// Tenant handles currently pooled
    pub pooled: usize,
    /// Distinct database names ever keyed
    pub known_keys: usize,
    /// Whether the default handle is established
    pub default_connected: bool,
    /// Handles established over the pool's lifetime
    pub total_established: u64,
    /// Pooled handles, sorted by database name
    pub entries: Vec<PoolEntryInfo>,
}

/// One pooled handle
#[derive(Debug, Clone, Serialize)]
pub struct PoolEntryInfo {
    pub database: String,
    pub established_at: DateTime<Utc>,
}
