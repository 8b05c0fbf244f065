//! In-process execution of a batch.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use jobrun_core::model::{InterviewSpec, JobDescriptor, ResultSet, TaskResult};
use jobrun_core::new_ulid;
use tokio::task::JoinSet;

use crate::cache::ResultsCache;
use crate::error::ExecutionError;
use crate::pool::ResourcePool;

/// Shared resources a run executes against.
///
/// Attached before either execution path starts and owned by that run alone.
#[derive(Debug, Clone)]
pub struct RunEnvironment {
    /// Cache consulted before executing an interview.
    pub cache: Arc<ResultsCache>,
    /// Per-model concurrency limits; required by [`PooledLocalRunner`].
    pub pool: Option<Arc<ResourcePool>>,
}

impl RunEnvironment {
    /// Environment with a cache and no resource pool yet.
    pub fn new(cache: Arc<ResultsCache>) -> Self {
        Self { cache, pool: None }
    }

    /// Attaches the run's resource pool.
    pub fn with_pool(mut self, pool: ResourcePool) -> Self {
        self.pool = Some(Arc::new(pool));
        self
    }
}

/// Runs a batch locally. Synchronous from the caller's point of view.
#[async_trait]
pub trait LocalExecutionRunner: Send + Sync {
    /// Fails when any service the batch needs has no credentials.
    fn verify_credentials(&self, job: &JobDescriptor) -> Result<(), ExecutionError>;

    /// Executes every interview of every iteration.
    async fn run(&self, job: &JobDescriptor, env: &RunEnvironment) -> anyhow::Result<ResultSet>;
}

/// Computes a single interview. What that means is up to the implementation.
#[async_trait]
pub trait InterviewExecutor: Send + Sync {
    /// Runs `interview` once.
    async fn execute(&self, interview: &InterviewSpec) -> anyhow::Result<TaskResult>;
}

/// Services that have credentials available to this process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    services: BTreeSet<String>,
}

impl Credentials {
    /// Services with a non-empty `<SERVICE>_API_KEY` environment variable.
    pub fn from_env() -> Self {
        let services = std::env::vars()
            .filter(|(_, v)| !v.trim().is_empty())
            .filter_map(|(k, _)| k.strip_suffix("_API_KEY").map(|s| s.to_ascii_lowercase()))
            .filter(|s| !s.is_empty())
            .collect();
        Self { services }
    }

    /// Adds a service with known credentials.
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.services.insert(service.into().to_ascii_lowercase());
        self
    }

    /// Distinct services in `job` lacking credentials, sorted.
    pub fn missing_for(&self, job: &JobDescriptor) -> Vec<String> {
        job.interviews
            .iter()
            .map(|i| i.service.to_ascii_lowercase())
            .filter(|s| !self.services.contains(s))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// Runs interviews concurrently through an [`InterviewExecutor`], bounded by
/// the run's resource pool and short-circuited by its cache.
///
/// Interviews that error are logged and left out of the result set; results
/// keep submission order (iteration-major). A run where every interview
/// errors fails with the first error it reported.
pub struct PooledLocalRunner {
    executor: Arc<dyn InterviewExecutor>,
    credentials: Credentials,
}

impl PooledLocalRunner {
    /// Runner using `executor` and checking against `credentials`.
    pub fn new(executor: Arc<dyn InterviewExecutor>, credentials: Credentials) -> Self {
        Self {
            executor,
            credentials,
        }
    }
}

#[async_trait]
impl LocalExecutionRunner for PooledLocalRunner {
    fn verify_credentials(&self, job: &JobDescriptor) -> Result<(), ExecutionError> {
        let missing = self.credentials.missing_for(job);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ExecutionError::MissingCredentials { services: missing })
        }
    }

    async fn run(&self, job: &JobDescriptor, env: &RunEnvironment) -> anyhow::Result<ResultSet> {
        let pool = env
            .pool
            .clone()
            .context("local run started without a resource pool")?;
        let run_id = new_ulid().to_string();
        let iterations = job.submission.iterations.max(1);
        tracing::info!(
            %run_id,
            interviews = job.interviews.len(),
            iterations,
            "local run started"
        );
        let mut tasks: JoinSet<(usize, anyhow::Result<TaskResult>)> = JoinSet::new();

        let mut index = 0usize;
        for iteration in 0..iterations {
            for interview in &job.interviews {
                let slot = index;
                index += 1;

                if !job.submission.force_fresh {
                    if let Some(hit) = env.cache.get(interview, iteration) {
                        tracing::debug!(
                            %run_id,
                            interview = %interview.name,
                            iteration,
                            "cache hit"
                        );
                        tasks.spawn(async move { (slot, Ok(hit)) });
                        continue;
                    }
                }

                let interview = interview.clone();
                let executor = Arc::clone(&self.executor);
                let pool = Arc::clone(&pool);
                let cache = Arc::clone(&env.cache);
                tasks.spawn(async move {
                    let outcome = async {
                        let _permit = pool.acquire(&interview.model_key()).await?;
                        let result = executor.execute(&interview).await?;
                        cache.put(&interview, iteration, result.clone());
                        anyhow::Ok(result)
                    }
                    .await;
                    let outcome = outcome.with_context(|| {
                        format!("interview {} (iteration {iteration})", interview.name)
                    });
                    (slot, outcome)
                });
            }
        }

        let mut finished: Vec<(usize, TaskResult)> = Vec::with_capacity(index);
        let mut failed = 0usize;
        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            match joined.context("interview task panicked")? {
                (slot, Ok(result)) => finished.push((slot, result)),
                (_, Err(e)) => {
                    failed += 1;
                    tracing::warn!(%run_id, error = %format!("{e:#}"), "interview failed");
                    first_error.get_or_insert(e);
                }
            }
        }
        if finished.is_empty() {
            if let Some(e) = first_error {
                return Err(e.context(format!("all {failed} interviews failed")));
            }
        }
        finished.sort_by_key(|(slot, _)| *slot);

        tracing::info!(%run_id, completed = finished.len(), failed, "local run finished");
        Ok(ResultSet::new(finished.into_iter().map(|(_, r)| r).collect()))
    }
}

/// Executor for processes with no local inference backend wired in.
///
/// Every interview fails with the same message, so a local run surfaces it
/// as a single error instead of an empty result set.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredExecutor;

#[async_trait]
impl InterviewExecutor for UnconfiguredExecutor {
    async fn execute(&self, interview: &InterviewSpec) -> anyhow::Result<TaskResult> {
        anyhow::bail!(
            "no local executor configured for {}; enable remote inference or embed jobrun-agent \
             with an InterviewExecutor",
            interview.model_key()
        )
    }
}
