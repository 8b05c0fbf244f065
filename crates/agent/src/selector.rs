//! Chooses remote or local execution for a batch.

use std::borrow::Cow;
use std::sync::Arc;

use jobrun_core::model::{JobDescriptor, ResultSet};
use jobrun_core::progress::ProgressReporter;

use crate::cache::ResultsCache;
use crate::client::PreferenceClient;
use crate::coordinator::{
    BackgroundJob, PollMode, Polled, RemoteExecutionCoordinator, RemoteRun,
};
use crate::error::ExecutionError;
use crate::local_runner::{LocalExecutionRunner, RunEnvironment};
use crate::pool::{ConcurrencyLimits, ResourcePool};

/// Per-invocation switches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Never contact the remote service.
    pub disable_remote: bool,
    /// `None` or `Some(true)` uses the process-wide cache; `Some(false)` a
    /// throwaway one.
    pub cache: Option<bool>,
    /// Blocking or background polling for remote runs.
    pub poll_mode: PollMode,
}

/// Where a batch ended up running and what it produced.
#[derive(Debug)]
pub enum ExecutionOutcome {
    /// Remote job reached a terminal status.
    Remote(RemoteRun),
    /// Remote job submitted in background mode.
    RemotePending(BackgroundJob),
    /// Batch ran in-process.
    Local(ResultSet),
}

impl ExecutionOutcome {
    /// Results, if any were produced synchronously.
    pub fn results(&self) -> Option<&ResultSet> {
        match self {
            ExecutionOutcome::Remote(run) => run.results.as_ref(),
            ExecutionOutcome::RemotePending(_) => None,
            ExecutionOutcome::Local(results) => Some(results),
        }
    }
}

/// Decides between remote and local execution and prepares the resources
/// both paths share.
pub struct ExecutionStrategySelector {
    coordinator: RemoteExecutionCoordinator,
    preferences: Arc<dyn PreferenceClient>,
    local: Arc<dyn LocalExecutionRunner>,
    shared_cache: Arc<ResultsCache>,
    limits: ConcurrencyLimits,
    reporter: Arc<dyn ProgressReporter>,
}

impl ExecutionStrategySelector {
    /// Selector using the process-wide cache and default concurrency limits.
    pub fn new(
        coordinator: RemoteExecutionCoordinator,
        preferences: Arc<dyn PreferenceClient>,
        local: Arc<dyn LocalExecutionRunner>,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Self {
        Self {
            coordinator,
            preferences,
            local,
            shared_cache: ResultsCache::shared(),
            limits: ConcurrencyLimits::default(),
            reporter,
        }
    }

    /// Replaces the cache used when caching is requested.
    pub fn with_shared_cache(mut self, cache: Arc<ResultsCache>) -> Self {
        self.shared_cache = cache;
        self
    }

    /// Sets per-model limits for local runs.
    pub fn with_limits(mut self, limits: ConcurrencyLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Runs `job` remotely when the account allows it, locally otherwise.
    ///
    /// A remote job that ends without results (cancelled, or failed before
    /// producing output) falls through to local execution. Errors from the
    /// remote client propagate without a local attempt.
    ///
    /// The cache choice applies to both paths: locally it picks the cache
    /// attached to the run, remotely `cache: Some(false)` submits the job as
    /// fresh so the service does not reuse stored answers either.
    pub async fn run(
        &self,
        job: &JobDescriptor,
        options: &RunOptions,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        let cache = match options.cache {
            None | Some(true) => Arc::clone(&self.shared_cache),
            Some(false) => ResultsCache::ephemeral(),
        };

        if !options.disable_remote && self.remote_available().await {
            tracing::info!(interviews = job.interviews.len(), "running job remotely");
            let remote_job = if options.cache == Some(false) {
                let mut fresh = job.clone();
                fresh.submission.force_fresh = true;
                Cow::Owned(fresh)
            } else {
                Cow::Borrowed(job)
            };
            let polled = self
                .coordinator
                .run(&remote_job, Arc::clone(&self.reporter), options.poll_mode)
                .await
                .map_err(ExecutionError::Remote)?;
            match polled {
                Polled::Background(pending) => {
                    return Ok(ExecutionOutcome::RemotePending(pending));
                }
                Polled::Finished(run) if run.results.is_some() => {
                    return Ok(ExecutionOutcome::Remote(run));
                }
                Polled::Finished(run) => {
                    tracing::warn!(
                        job_id = %run.job_id,
                        status = %run.status,
                        reason = ?run.reason,
                        "remote job produced no results; running locally"
                    );
                }
            }
        }

        tracing::info!(interviews = job.interviews.len(), "running job locally");
        self.local.verify_credentials(job)?;
        let env = RunEnvironment::new(cache)
            .with_pool(ResourcePool::for_interviews(&job.interviews, &self.limits));
        let results = self
            .local
            .run(job, &env)
            .await
            .map_err(ExecutionError::Local)?;
        Ok(ExecutionOutcome::Local(results))
    }

    /// Remote is usable only when the preference lookup succeeds and says so.
    async fn remote_available(&self) -> bool {
        match self.preferences.remote_inference_enabled().await {
            Ok(enabled) => enabled,
            Err(e) => {
                tracing::debug!(
                    error = %format!("{e:#}"),
                    "remote preference lookup failed; using local execution"
                );
                false
            }
        }
    }
}
