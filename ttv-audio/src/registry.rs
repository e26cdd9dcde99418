//! Resource Registry
//!
//! Single owner of transient binary audio data (generated clips, uploaded
//! samples, recordings). Callers hold a `ResourceHandle` and exchange its id
//! for a `Locator`; the bytes stay inside the registry until released.
//!
//! Entries leave the registry in three ways:
//! - explicit `release` (idempotent)
//! - `sweep`: idle longer than `max_idle_secs` or older than `max_age_secs`
//! - `enforce_budget`: aggregate size over `max_total_bytes`, evicting the
//!   least recently accessed entries down to `eviction_target_ratio` of budget
//!
//! Eviction is synchronous; callers observe it as `NotFound` on the next
//! access. Evictions are also reported on the event bus when one is attached.

use crate::error::ResourceError;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use ttv_common::config::RegistryConfig;
use ttv_common::events::{EventBus, EvictionReason, TtvEvent};

/// Opaque reference to registered bytes (the equivalent of an object URL)
///
/// Every registration mints a fresh locator, so a released locator can never
/// resolve to newer data registered under the same id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Locator(String);

impl Locator {
    fn mint() -> Self {
        Locator(format!("blob:ttv/{}", ttv_common::uuid_utils::generate()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Caller-facing view of a registered resource
#[derive(Debug, Clone)]
pub struct ResourceHandle {
    pub id: String,
    pub locator: Locator,
    pub size_bytes: u64,
    pub created_at: Instant,
    pub last_accessed_at: Instant,
}

struct Entry {
    locator: Locator,
    data: Bytes,
    created_at: Instant,
    last_accessed_at: Instant,
    /// Tie-breaker for entries touched at the same instant
    access_seq: u64,
}

impl Entry {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn handle(&self, id: &str) -> ResourceHandle {
        ResourceHandle {
            id: id.to_string(),
            locator: self.locator.clone(),
            size_bytes: self.size(),
            created_at: self.created_at,
            last_accessed_at: self.last_accessed_at,
        }
    }
}

#[derive(Default)]
struct RegistryInner {
    entries: HashMap<String, Entry>,
    /// locator -> id, for resolving locators back to entries
    locators: HashMap<Locator, String>,
    total_bytes: u64,
    access_counter: u64,
}

impl RegistryInner {
    fn next_seq(&mut self) -> u64 {
        self.access_counter += 1;
        self.access_counter
    }

    fn remove(&mut self, id: &str) -> Option<Entry> {
        let entry = self.entries.remove(id)?;
        self.locators.remove(&entry.locator);
        self.total_bytes -= entry.size();
        Some(entry)
    }

    fn touch(&mut self, id: &str) -> Option<&Entry> {
        let seq = self.next_seq();
        let entry = self.entries.get_mut(id)?;
        entry.last_accessed_at = Instant::now();
        entry.access_seq = seq;
        Some(entry)
    }
}

/// Tracks ownership, age and aggregate size of transient audio data
pub struct ResourceRegistry {
    inner: RwLock<RegistryInner>,
    config: RegistryConfig,
    events: Option<EventBus>,
}

impl ResourceRegistry {
    /// Create an empty registry with the given budget and ageing policy
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
            config,
            events: None,
        }
    }

    /// Report evictions on this event bus
    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Take ownership of `data` and mint a locator for it
    ///
    /// A missing `id` is generated. Registering under an existing id replaces
    /// the previous entry and invalidates its locator. The budget is enforced
    /// right after insertion; the entry just registered is never the one
    /// evicted, so a payload larger than the eviction target is refused.
    pub async fn register(
        &self,
        data: impl Into<Bytes>,
        id: Option<String>,
    ) -> Result<ResourceHandle, ResourceError> {
        let data: Bytes = data.into();
        let id = id.unwrap_or_else(ttv_common::uuid_utils::generate_string);
        let size_bytes = data.len() as u64;

        let target = self.config.eviction_target_bytes();
        if size_bytes > target {
            warn!(
                resource_id = %id,
                size_bytes,
                target_bytes = target,
                budget_bytes = self.config.max_total_bytes,
                "Refusing resource larger than the eviction target"
            );
            return Err(ResourceError::AllocationFailed {
                id,
                size_bytes,
                budget_bytes: target,
            });
        }

        let mut inner = self.inner.write().await;

        if let Some(previous) = inner.remove(&id) {
            debug!(resource_id = %id, "Replacing existing resource");
            self.report_eviction(&id, previous.size(), EvictionReason::Replaced);
        }

        let now = Instant::now();
        let access_seq = inner.next_seq();
        let locator = Locator::mint();
        let entry = Entry {
            locator: locator.clone(),
            data,
            created_at: now,
            last_accessed_at: now,
            access_seq,
        };
        let handle = entry.handle(&id);

        inner.locators.insert(locator, id.clone());
        inner.entries.insert(id.clone(), entry);
        inner.total_bytes += size_bytes;

        debug!(
            resource_id = %id,
            size_bytes,
            total_bytes = inner.total_bytes,
            "Registered resource"
        );

        self.enforce_budget_locked(&mut inner, Some(&id));

        Ok(handle)
    }

    /// Exchange an id for its locator, marking the entry as recently used
    pub async fn access(&self, id: &str) -> Result<Locator, ResourceError> {
        let mut inner = self.inner.write().await;
        inner
            .touch(id)
            .map(|entry| entry.locator.clone())
            .ok_or_else(|| ResourceError::NotFound { id: id.to_string() })
    }

    /// Resolve a locator to its bytes
    ///
    /// Fails with `Released` once the owning entry is gone; a stale locator
    /// never resolves to other data.
    pub async fn read(&self, locator: &Locator) -> Result<Bytes, ResourceError> {
        let mut inner = self.inner.write().await;
        let Some(id) = inner.locators.get(locator).cloned() else {
            warn!(locator = %locator, "Locator resolved after release");
            return Err(ResourceError::Released {
                locator: locator.to_string(),
            });
        };
        inner
            .touch(&id)
            .map(|entry| entry.data.clone())
            .ok_or_else(|| ResourceError::Released {
                locator: locator.to_string(),
            })
    }

    /// Current handle for an id without counting as an access
    pub async fn handle(&self, id: &str) -> Option<ResourceHandle> {
        let inner = self.inner.read().await;
        inner.entries.get(id).map(|entry| entry.handle(id))
    }

    /// Release an entry and invalidate its locator
    ///
    /// Idempotent; returns whether anything was removed.
    pub async fn release(&self, id: &str) -> bool {
        let mut inner = self.inner.write().await;
        match inner.remove(id) {
            Some(entry) => {
                debug!(resource_id = %id, size_bytes = entry.size(), "Released resource");
                true
            }
            None => false,
        }
    }

    /// Release everything (teardown)
    pub async fn release_all(&self) -> usize {
        let mut inner = self.inner.write().await;
        let count = inner.entries.len();
        inner.entries.clear();
        inner.locators.clear();
        inner.total_bytes = 0;
        count
    }

    /// Remove entries past the idle window or the maximum age
    ///
    /// Returns the evicted ids.
    pub async fn sweep(&self) -> Vec<String> {
        let mut inner = self.inner.write().await;
        let now = Instant::now();
        let max_idle = self.config.max_idle_age();
        let max_age = self.config.max_age();

        let stale: Vec<(String, EvictionReason)> = inner
            .entries
            .iter()
            .filter_map(|(id, entry)| {
                if now.duration_since(entry.created_at) > max_age {
                    Some((id.clone(), EvictionReason::MaxAge))
                } else if now.duration_since(entry.last_accessed_at) > max_idle {
                    Some((id.clone(), EvictionReason::IdleTimeout))
                } else {
                    None
                }
            })
            .collect();

        let mut evicted = Vec::with_capacity(stale.len());
        for (id, reason) in stale {
            if let Some(entry) = inner.remove(&id) {
                debug!(resource_id = %id, %reason, "Swept resource");
                self.report_eviction(&id, entry.size(), reason);
                evicted.push(id);
            }
        }

        if !evicted.is_empty() {
            info!(
                evicted = evicted.len(),
                remaining = inner.entries.len(),
                "Resource sweep complete"
            );
        }
        evicted
    }

    /// Evict least recently accessed entries while over budget
    ///
    /// Returns the evicted ids. Runs automatically after every `register`.
    pub async fn enforce_budget(&self) -> Vec<String> {
        let mut inner = self.inner.write().await;
        self.enforce_budget_locked(&mut inner, None)
    }

    fn enforce_budget_locked(&self, inner: &mut RegistryInner, keep: Option<&str>) -> Vec<String> {
        if inner.total_bytes <= self.config.max_total_bytes {
            return Vec::new();
        }

        let target = self.config.eviction_target_bytes();
        let mut candidates: Vec<(Instant, u64, String)> = inner
            .entries
            .iter()
            .filter(|(id, _)| Some(id.as_str()) != keep)
            .map(|(id, entry)| (entry.last_accessed_at, entry.access_seq, id.clone()))
            .collect();
        candidates.sort();

        let mut evicted = Vec::new();
        for (_, _, id) in candidates {
            if inner.total_bytes <= target {
                break;
            }
            if let Some(entry) = inner.remove(&id) {
                self.report_eviction(&id, entry.size(), EvictionReason::Budget);
                evicted.push(id);
            }
        }

        warn!(
            evicted = evicted.len(),
            total_bytes = inner.total_bytes,
            budget_bytes = self.config.max_total_bytes,
            "Resource budget exceeded, evicted least recently used entries"
        );
        evicted
    }

    fn report_eviction(&self, id: &str, size_bytes: u64, reason: EvictionReason) {
        if let Some(events) = &self.events {
            events.emit_lossy(TtvEvent::ResourceEvicted {
                resource_id: id.to_string(),
                size_bytes,
                reason,
                timestamp: ttv_common::time::now(),
            });
        }
    }

    pub async fn total_bytes(&self) -> u64 {
        self.inner.read().await.total_bytes
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.entries.is_empty()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.inner.read().await.entries.contains_key(id)
    }
}

/// Run `sweep` every `sweep_interval_secs` until `cancel` fires
pub fn spawn_sweeper(registry: Arc<ResourceRegistry>, cancel: CancellationToken) -> JoinHandle<()> {
    let period = registry.config().sweep_interval().max(Duration::from_millis(1));

    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        info!("Resource sweeper started ({:?} interval)", period);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    registry.sweep().await;
                }
            }
        }

        debug!("Resource sweeper stopped");
    })
}
