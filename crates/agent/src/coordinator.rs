//! Drives a remote job from submission to a terminal status.
//!
//! The poll loop has no deadline of its own: it trusts the remote service to
//! eventually report a terminal status. Callers that need one wrap the call
//! in `tokio::time::timeout`. Cancellation is remote-initiated only and is
//! observed as `cancelled` on the next poll.

use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use jobrun_core::api::CreateJobResponse;
use jobrun_core::cost::{CostReconciler, CostSummary};
use jobrun_core::model::{InterviewOutcome, JobDescriptor, JobSnapshot, JobStatus, ResultSet};
use jobrun_core::now_ms;
use jobrun_core::progress::{InfoKey, ProgressReporter};
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::client::{RemoteJobClient, RESULTS_OBJECT_TYPE};

/// Default delay between status polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(4);

/// Failure reason the service uses when the account cannot pay for a job.
pub const INSUFFICIENT_FUNDS: &str = "insufficient funds";

const FUNDS_MESSAGE: &str =
    "Insufficient funds to run this job. Add credits to your account and resubmit.";
const SUPPORT_MESSAGE: &str =
    "No error report is available for this job. Contact support with the job id for help.";

/// A submitted job. Bound to one job id for its whole life and consumed by
/// polling.
pub struct RemoteJobHandle {
    job_id: String,
    creation_info: CreateJobResponse,
    reporter: Arc<dyn ProgressReporter>,
    submitted: Option<u64>,
}

impl RemoteJobHandle {
    /// Remote job id.
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Everything the service returned on creation.
    pub fn creation_info(&self) -> &CreateJobResponse {
        &self.creation_info
    }
}

impl std::fmt::Debug for RemoteJobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteJobHandle")
            .field("job_id", &self.job_id)
            .field("submitted", &self.submitted)
            .finish_non_exhaustive()
    }
}

/// How [`RemoteExecutionCoordinator::poll`] behaves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PollMode {
    /// Loop until a terminal status.
    #[default]
    Blocking,
    /// Return a [`BackgroundJob`] right away; nothing polls until it is resolved.
    Background,
}

/// Terminal outcome of a remote job.
#[derive(Debug, Clone, Serialize)]
pub struct RemoteRun {
    /// Remote job id.
    pub job_id: String,
    /// Terminal status the job ended in.
    pub status: JobStatus,
    /// Present for completed and partially failed jobs, and for failed jobs
    /// that still produced output.
    pub results: Option<ResultSet>,
    /// Reason given by the service, if any.
    pub reason: Option<String>,
    /// Last interview counters seen while polling.
    pub interviews: InterviewOutcome,
    /// Only computed for completed jobs.
    pub costs: Option<CostSummary>,
    /// Where the service published details about failures.
    pub error_report_url: Option<String>,
}

/// Result of [`RemoteExecutionCoordinator::poll`].
#[derive(Debug)]
pub enum Polled {
    /// The job reached a terminal status.
    Finished(RemoteRun),
    /// Polling was deferred.
    Background(BackgroundJob),
}

/// A job left running in the background. Awaiting it (or calling
/// [`BackgroundJob::resolve`]) re-enters the blocking poll loop.
pub struct BackgroundJob {
    job_id: String,
    reporter: Arc<dyn ProgressReporter>,
    submitted: Option<u64>,
    coordinator: RemoteExecutionCoordinator,
}

impl BackgroundJob {
    /// Remote job id.
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Polls until the job reaches a terminal status.
    pub async fn resolve(self) -> anyhow::Result<RemoteRun> {
        self.coordinator
            .poll_until_terminal(&self.job_id, self.reporter.as_ref(), self.submitted)
            .await
    }

    /// Caps reported interview counts at `total` submitted interviews.
    pub fn with_submitted(mut self, total: u64) -> Self {
        self.submitted = Some(total);
        self
    }

    /// Resolves on the runtime without blocking the caller.
    pub fn spawn(self) -> JoinHandle<anyhow::Result<RemoteRun>> {
        tokio::spawn(self.resolve())
    }
}

impl std::fmt::Debug for BackgroundJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundJob")
            .field("job_id", &self.job_id)
            .finish_non_exhaustive()
    }
}

impl IntoFuture for BackgroundJob {
    type Output = anyhow::Result<RemoteRun>;
    type IntoFuture = Pin<Box<dyn Future<Output = Self::Output> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.resolve())
    }
}

/// Submits jobs and polls them to completion.
///
/// Cheap to clone; each poll sequence only touches its own reporter, so many
/// jobs can be polled concurrently. Polls for one job are strictly
/// sequential.
#[derive(Clone)]
pub struct RemoteExecutionCoordinator {
    client: Arc<dyn RemoteJobClient>,
    reconciler: Arc<CostReconciler>,
    poll_interval: Duration,
    include_cached_costs: bool,
}

impl RemoteExecutionCoordinator {
    /// Coordinator with the default poll interval and no fallback prices.
    pub fn new(client: Arc<dyn RemoteJobClient>) -> Self {
        Self {
            client,
            reconciler: Arc::new(CostReconciler::default()),
            poll_interval: DEFAULT_POLL_INTERVAL,
            include_cached_costs: false,
        }
    }

    /// Overrides the delay between polls.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Uses `reconciler` for completed jobs.
    pub fn with_reconciler(mut self, reconciler: CostReconciler) -> Self {
        self.reconciler = Arc::new(reconciler);
        self
    }

    /// Counts cache hits in cost totals.
    pub fn with_cached_costs(mut self, include: bool) -> Self {
        self.include_cached_costs = include;
        self
    }

    /// Delay between polls.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Creates the remote job. Client errors propagate as-is; nothing retries.
    pub async fn submit(
        &self,
        job: &JobDescriptor,
        reporter: Arc<dyn ProgressReporter>,
    ) -> anyhow::Result<RemoteJobHandle> {
        let creation_info = self.client.create(job).await?;
        let job_id = creation_info.job_id.clone();
        tracing::info!(%job_id, interviews = job.interviews.len(), "remote job created");

        reporter.add_info(InfoKey::JobId, serde_json::json!(job_id));
        if let Some(base) = self.client.base_url() {
            reporter.add_info(
                InfoKey::ProgressUrl,
                serde_json::json!(format!("{base}/home/remote-job-progress/{job_id}")),
            );
        }
        // Submission and acceptance are simultaneous from the caller's side.
        reporter.update("Job sent to server", JobStatus::Queued);
        reporter.update("Job is running remotely", JobStatus::Running);

        let submitted = job
            .interview_count()
            .checked_mul(u64::from(job.submission.iterations.max(1)));
        Ok(RemoteJobHandle {
            job_id,
            creation_info,
            reporter,
            submitted,
        })
    }

    /// Polls `handle` according to `mode`. The handle is consumed either way.
    pub async fn poll(&self, handle: RemoteJobHandle, mode: PollMode) -> anyhow::Result<Polled> {
        match mode {
            PollMode::Background => Ok(Polled::Background(BackgroundJob {
                job_id: handle.job_id,
                reporter: handle.reporter,
                submitted: handle.submitted,
                coordinator: self.clone(),
            })),
            PollMode::Blocking => Ok(Polled::Finished(self.wait(handle).await?)),
        }
    }

    /// Blocking-mode poll.
    pub async fn wait(&self, handle: RemoteJobHandle) -> anyhow::Result<RemoteRun> {
        self.poll_until_terminal(&handle.job_id, handle.reporter.as_ref(), handle.submitted)
            .await
    }

    /// Picks up an already submitted job by id.
    ///
    /// Nothing guards against resuming a job that already reached a terminal
    /// status; it will simply report that status again.
    ///
    /// The submitted interview count is unknown here, so counts reported by
    /// the service are taken as-is unless [`BackgroundJob::with_submitted`]
    /// supplies it.
    pub fn resume(
        &self,
        job_id: impl Into<String>,
        reporter: Arc<dyn ProgressReporter>,
    ) -> BackgroundJob {
        let job_id = job_id.into();
        reporter.add_info(InfoKey::JobId, serde_json::json!(job_id));
        BackgroundJob {
            job_id,
            reporter,
            submitted: None,
            coordinator: self.clone(),
        }
    }

    /// Submit followed by [`RemoteExecutionCoordinator::poll`].
    pub async fn run(
        &self,
        job: &JobDescriptor,
        reporter: Arc<dyn ProgressReporter>,
        mode: PollMode,
    ) -> anyhow::Result<Polled> {
        let handle = self.submit(job, reporter).await?;
        self.poll(handle, mode).await
    }

    /// Submits and polls on the runtime, leaving the caller free.
    pub fn spawn_run(
        &self,
        job: JobDescriptor,
        reporter: Arc<dyn ProgressReporter>,
    ) -> JoinHandle<anyhow::Result<RemoteRun>> {
        let this = self.clone();
        tokio::spawn(async move {
            let handle = this.submit(&job, reporter).await?;
            this.wait(handle).await
        })
    }

    async fn poll_until_terminal(
        &self,
        job_id: &str,
        reporter: &dyn ProgressReporter,
        submitted: Option<u64>,
    ) -> anyhow::Result<RemoteRun> {
        let mut interviews = InterviewOutcome::default();

        loop {
            let snapshot = self.client.get_status(job_id).await?;
            tracing::debug!(%job_id, status = %snapshot.status, "polled job");

            if let Some(details) = &snapshot.interview_details {
                interviews.merge(details, submitted);
                publish_counts(reporter, &interviews);
            }

            if snapshot.status.is_terminal() {
                return self.finish(job_id, snapshot, interviews, reporter).await;
            }

            reporter.update(
                &format!(
                    "Job status: {} - last update: {}",
                    snapshot.status,
                    now_ms()
                ),
                snapshot.status,
            );
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn finish(
        &self,
        job_id: &str,
        snapshot: JobSnapshot,
        interviews: InterviewOutcome,
        reporter: &dyn ProgressReporter,
    ) -> anyhow::Result<RemoteRun> {
        let JobSnapshot {
            status,
            reason,
            results_id,
            error_report_url,
            ..
        } = snapshot;

        let mut run = RemoteRun {
            job_id: job_id.to_string(),
            status,
            results: None,
            reason,
            interviews,
            costs: None,
            error_report_url,
        };

        match status {
            JobStatus::Cancelled => {
                let message = match &run.reason {
                    Some(reason) => format!("Job cancelled: {reason}"),
                    None => "Job cancelled".to_string(),
                };
                tracing::warn!(%job_id, reason = ?run.reason, "remote job cancelled");
                reporter.update(&message, JobStatus::Cancelled);
            }
            JobStatus::Failed => {
                tracing::warn!(%job_id, reason = ?run.reason, "remote job failed");
                reporter.update("Job failed", JobStatus::Failed);
                if run.reason.as_deref() == Some(INSUFFICIENT_FUNDS) {
                    reporter.update(FUNDS_MESSAGE, JobStatus::Failed);
                }
                report_error_url(reporter, run.error_report_url.as_deref(), JobStatus::Failed);
                if let Some(id) = results_id {
                    run.results = Some(self.fetch_results(reporter, &id).await?);
                }
            }
            JobStatus::PartiallyFailed => {
                tracing::warn!(%job_id, "remote job partially failed");
                reporter.update(
                    "Job completed with some failed interviews",
                    JobStatus::PartiallyFailed,
                );
                report_error_url(
                    reporter,
                    run.error_report_url.as_deref(),
                    JobStatus::PartiallyFailed,
                );
                let id = results_id
                    .with_context(|| format!("partially failed job {job_id} has no results_id"))?;
                run.results = Some(self.fetch_results(reporter, &id).await?);
            }
            JobStatus::Completed => {
                let id = results_id
                    .with_context(|| format!("completed job {job_id} has no results_id"))?;
                let results = self.fetch_results(reporter, &id).await?;
                let costs = self.reconciler.summarize(&results, self.include_cached_costs);
                reporter.add_info(InfoKey::ModelCosts, serde_json::to_value(&costs.breakdown)?);
                publish_counts(reporter, &run.interviews);
                tracing::info!(
                    %job_id,
                    results = results.len(),
                    credits = costs.total_credits,
                    "remote job completed"
                );
                reporter.update("Job completed and results retrieved", JobStatus::Completed);
                run.costs = Some(costs);
                run.results = Some(results);
            }
            JobStatus::Queued | JobStatus::Running | JobStatus::Cancelling => {
                anyhow::bail!("job {job_id} is not in a terminal status ({status})")
            }
        }

        Ok(run)
    }

    async fn fetch_results(
        &self,
        reporter: &dyn ProgressReporter,
        results_id: &str,
    ) -> anyhow::Result<ResultSet> {
        reporter.add_info(InfoKey::ResultsId, serde_json::json!(results_id));
        if let Some(base) = self.client.base_url() {
            reporter.add_info(
                InfoKey::ResultsUrl,
                serde_json::json!(format!("{base}/content/{results_id}")),
            );
        }
        self.client.get_object(results_id, RESULTS_OBJECT_TYPE).await
    }
}

fn publish_counts(reporter: &dyn ProgressReporter, interviews: &InterviewOutcome) {
    reporter.add_info(
        InfoKey::CompletedInterviews,
        serde_json::json!(interviews.completed_count),
    );
    reporter.add_info(
        InfoKey::FailedInterviews,
        serde_json::json!(interviews.failed_count),
    );
    if let Ok(summary) = serde_json::to_value(&interviews.exception_summary) {
        reporter.add_info(InfoKey::ExceptionSummary, summary);
    }
}

fn report_error_url(reporter: &dyn ProgressReporter, url: Option<&str>, status: JobStatus) {
    match url {
        Some(url) => {
            reporter.add_info(InfoKey::ErrorReportUrl, serde_json::json!(url));
            reporter.update(&format!("Error report: {url}"), status);
        }
        None if status == JobStatus::Failed => reporter.update(SUPPORT_MESSAGE, status),
        None => {}
    }
}
