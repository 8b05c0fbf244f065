//! Results cache shared by the local and remote execution paths.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use jobrun_core::cost::COST_SUFFIX;
use jobrun_core::model::{InterviewSpec, TaskResult};

static PROCESS_CACHE: OnceLock<Arc<ResultsCache>> = OnceLock::new();

/// Interview results keyed by [`fingerprint`].
#[derive(Debug, Default)]
pub struct ResultsCache {
    persistent: bool,
    entries: Mutex<HashMap<String, TaskResult>>,
}

impl ResultsCache {
    /// The process-wide cache. Every run that asks for caching shares it.
    pub fn shared() -> Arc<Self> {
        PROCESS_CACHE
            .get_or_init(|| {
                Arc::new(Self {
                    persistent: true,
                    entries: Mutex::default(),
                })
            })
            .clone()
    }

    /// A fresh cache that lives only as long as the run holding it.
    pub fn ephemeral() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// False for [`ResultsCache::ephemeral`] caches.
    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, TaskResult>> {
        self.entries.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Cached result for `interview` in `iteration`, marked as answered from
    /// cache so cost reconciliation can leave it out.
    pub fn get(&self, interview: &InterviewSpec, iteration: u32) -> Option<TaskResult> {
        let mut hit = self.entries().get(&fingerprint(interview, iteration))?.clone();
        let questions: Vec<String> = hit
            .raw_model_response
            .keys()
            .filter_map(|k| k.strip_suffix(COST_SUFFIX))
            .map(str::to_string)
            .collect();
        for q in questions {
            hit.cache_used.insert(q, true);
        }
        Some(hit)
    }

    /// Stores a freshly computed result.
    pub fn put(&self, interview: &InterviewSpec, iteration: u32, result: TaskResult) {
        self.entries().insert(fingerprint(interview, iteration), result);
    }

    /// Number of cached results.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// True when nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

/// Stable cache key for one interview in one iteration.
pub fn fingerprint(interview: &InterviewSpec, iteration: u32) -> String {
    // serde_json maps are ordered, so the payload renders deterministically.
    format!(
        "{}\u{1f}{}\u{1f}{}\u{1f}{}\u{1f}{}",
        interview.service, interview.model, interview.name, iteration, interview.payload
    )
}
