//! Concurrency limits for local execution, one semaphore per (service, model).

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::Context;
use jobrun_core::model::{InterviewSpec, ModelKey};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Default in-flight requests allowed per model.
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Per-model in-flight request limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConcurrencyLimits {
    default: usize,
    overrides: BTreeMap<ModelKey, usize>,
}

impl Default for ConcurrencyLimits {
    fn default() -> Self {
        Self::new(DEFAULT_CONCURRENCY)
    }
}

impl ConcurrencyLimits {
    /// Same limit for every model. Zero is treated as one.
    pub fn new(default: usize) -> Self {
        Self {
            default: default.max(1),
            overrides: BTreeMap::new(),
        }
    }

    /// Sets a specific limit for `key`.
    pub fn with_override(mut self, key: ModelKey, limit: usize) -> Self {
        self.overrides.insert(key, limit.max(1));
        self
    }

    /// Limit that applies to `key`.
    pub fn limit_for(&self, key: &ModelKey) -> usize {
        self.overrides.get(key).copied().unwrap_or(self.default)
    }
}

/// Semaphores shared by every interview targeting the same model.
///
/// Built once per run and dropped with it.
#[derive(Debug, Default)]
pub struct ResourcePool {
    slots: HashMap<ModelKey, Slot>,
}

#[derive(Debug)]
struct Slot {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl ResourcePool {
    /// One semaphore per distinct model among `interviews`.
    pub fn for_interviews(interviews: &[InterviewSpec], limits: &ConcurrencyLimits) -> Self {
        let mut slots = HashMap::new();
        for interview in interviews {
            let key = interview.model_key();
            slots.entry(key).or_insert_with_key(|k| {
                let capacity = limits.limit_for(k);
                Slot {
                    semaphore: Arc::new(Semaphore::new(capacity)),
                    capacity,
                }
            });
        }
        tracing::debug!(models = slots.len(), "built resource pool");
        Self { slots }
    }

    /// Waits for a free slot for `key`.
    pub async fn acquire(&self, key: &ModelKey) -> anyhow::Result<OwnedSemaphorePermit> {
        let slot = self
            .slots
            .get(key)
            .with_context(|| format!("no resource pool entry for {key}"))?;
        Ok(Arc::clone(&slot.semaphore).acquire_owned().await?)
    }

    /// Configured capacity for `key`.
    pub fn capacity(&self, key: &ModelKey) -> Option<usize> {
        self.slots.get(key).map(|s| s.capacity)
    }

    /// Slots currently free for `key`.
    pub fn available(&self, key: &ModelKey) -> Option<usize> {
        self.slots.get(key).map(|s| s.semaphore.available_permits())
    }

    /// Models this pool covers.
    pub fn models(&self) -> impl Iterator<Item = &ModelKey> {
        self.slots.keys()
    }
}
