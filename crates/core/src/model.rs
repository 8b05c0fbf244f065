//! Job, interview and result types shared by every execution path.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle status of a remote job.
///
/// `Cancelling` is a transient flavour of `Running`: the job is still alive
/// and polling continues until one of the terminal variants shows up.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Accepted, not started.
    Queued,
    /// Interviews are executing.
    Running,
    /// Cancellation requested; still running.
    Cancelling,
    /// Every interview finished.
    Completed,
    /// The job failed as a whole.
    Failed,
    /// Finished with some failed interviews; results exist.
    PartiallyFailed,
    /// Stopped before finishing.
    Cancelled,
}

impl JobStatus {
    /// All variants, in lifecycle order.
    pub const ALL: [JobStatus; 7] = [
        JobStatus::Queued,
        JobStatus::Running,
        JobStatus::Cancelling,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::PartiallyFailed,
        JobStatus::Cancelled,
    ];

    /// No further transitions follow a terminal status.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed
                | JobStatus::Failed
                | JobStatus::PartiallyFailed
                | JobStatus::Cancelled
        )
    }

    /// Wire name, e.g. `partially_failed`.
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Cancelling => "cancelling",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::PartiallyFailed => "partially_failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status string that does not name any [`JobStatus`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown job status: {0}")]
pub struct ParseStatusError(pub String);

impl FromStr for JobStatus {
    type Err = ParseStatusError;

    /// Case-insensitive; accepts `partially failed` as well as `partially_failed`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        JobStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == normalized)
            .ok_or_else(|| ParseStatusError(s.to_string()))
    }
}

/// Who can see a submitted job and its results.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    /// Owner only.
    #[default]
    Private,
    /// Listed publicly.
    Public,
    /// Reachable by link, not listed.
    Unlisted,
}

/// Parameters for submitting a job to the remote service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobSubmission {
    /// How many times the whole interview collection is run.
    #[serde(default = "default_iterations")]
    pub iterations: u32,
    /// Free-form description shown alongside the job.
    #[serde(default)]
    pub description: Option<String>,
    /// Who can see the job.
    #[serde(default)]
    pub visibility: Visibility,
    /// Ignore any cached answers on the remote side.
    #[serde(default)]
    pub force_fresh: bool,
}

fn default_iterations() -> u32 {
    1
}

impl Default for JobSubmission {
    fn default() -> Self {
        Self {
            iterations: default_iterations(),
            description: None,
            visibility: Visibility::default(),
            force_fresh: false,
        }
    }
}

/// (service, model) pair. Keys cost aggregation and local resource pools.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ModelKey {
    /// Inference service, e.g. `openai`.
    pub service: String,
    /// Model name as the service knows it.
    pub model: String,
}

impl ModelKey {
    /// Builds a key from anything string-like.
    pub fn new(service: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            model: model.into(),
        }
    }
}

impl fmt::Display for ModelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.service, self.model)
    }
}

/// A single interview to run: one model answering a set of questions.
///
/// What the interview computes is opaque here; `payload` is handed to
/// whichever executor runs it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InterviewSpec {
    /// Stable name within the job.
    pub name: String,
    /// Inference service.
    pub service: String,
    /// Model name.
    pub model: String,
    /// Whatever the executor needs, e.g. the questions.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl InterviewSpec {
    /// Pool / pricing key for this interview.
    pub fn model_key(&self) -> ModelKey {
        ModelKey::new(&self.service, &self.model)
    }
}

/// Everything needed to run a batch, locally or remotely.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobDescriptor {
    /// Interviews of one iteration.
    pub interviews: Vec<InterviewSpec>,
    /// Submission parameters.
    #[serde(default)]
    pub submission: JobSubmission,
}

impl JobDescriptor {
    /// Number of interviews one iteration submits.
    pub fn interview_count(&self) -> u64 {
        self.interviews.len() as u64
    }
}

/// One row of the exception summary reported while a job runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExceptionSummaryEntry {
    /// Exception class name as reported by the service.
    pub exception_type: String,
    /// Service the failing call went to.
    pub inference_service: String,
    /// Model the failing call went to.
    pub model: String,
    /// Question being answered.
    pub question_name: String,
    /// Occurrences so far.
    #[serde(rename = "exception_count")]
    pub count: u64,
}

/// Interview progress counters carried by a single status poll.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct InterviewDetails {
    /// Interviews finished so far.
    pub completed_interviews: u64,
    /// Interviews that failed so far.
    pub failed_interviews: u64,
    /// Exceptions grouped by type, model and question.
    #[serde(default)]
    pub exception_summary: Vec<ExceptionSummaryEntry>,
}

/// One poll's view of a remote job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobSnapshot {
    /// Status at poll time.
    pub status: JobStatus,
    /// Explanation for failures and cancellations.
    #[serde(default)]
    pub reason: Option<String>,
    /// Present only once output exists.
    #[serde(default)]
    pub results_id: Option<String>,
    /// Counters, when the service sent any.
    #[serde(default)]
    pub interview_details: Option<InterviewDetails>,
    /// Link to a failure report.
    #[serde(default)]
    pub error_report_url: Option<String>,
}

impl JobSnapshot {
    /// Snapshot with only a status set.
    pub fn with_status(status: JobStatus) -> Self {
        Self {
            status,
            reason: None,
            results_id: None,
            interview_details: None,
            error_report_url: None,
        }
    }
}

/// Latest known interview counters for a job.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct InterviewOutcome {
    /// Completed interviews.
    pub completed_count: u64,
    /// Failed interviews.
    pub failed_count: u64,
    /// Latest exception summary.
    pub exception_summary: Vec<ExceptionSummaryEntry>,
}

impl InterviewOutcome {
    /// Replaces the counters with the ones from `details`.
    ///
    /// Counts are never accumulated, so merging the same details twice is a
    /// no-op. When `submitted` is known, `completed + failed` is capped at it
    /// (completed counts win).
    pub fn merge(&mut self, details: &InterviewDetails, submitted: Option<u64>) {
        let mut completed = details.completed_interviews;
        let mut failed = details.failed_interviews;
        if let Some(limit) = submitted {
            if completed.saturating_add(failed) > limit {
                tracing::warn!(
                    completed,
                    failed,
                    submitted = limit,
                    "interview counts exceed submitted total; capping"
                );
                completed = completed.min(limit);
                failed = failed.min(limit - completed);
            }
        }
        self.completed_count = completed;
        self.failed_count = failed;
        self.exception_summary = details.exception_summary.clone();
    }
}

/// A status message emitted while a job runs. Events are append-only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProgressEvent {
    /// Human-readable text.
    pub message: String,
    /// Status the message was emitted under.
    pub status: JobStatus,
    /// Unix epoch milliseconds.
    pub timestamp_ms: i64,
}

/// Output of one interview.
///
/// `raw_model_response` holds per-question fields as produced by the
/// inference layer: token counts and the per-million-token prices in effect
/// when the question was answered (see [`crate::cost`]).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TaskResult {
    /// Name of the interview that produced this.
    pub interview: String,
    /// Inference service used.
    pub service: String,
    /// Model used.
    pub model: String,
    /// Question name -> answer.
    #[serde(default)]
    pub answers: serde_json::Map<String, serde_json::Value>,
    /// Per-question usage and pricing fields.
    #[serde(default)]
    pub raw_model_response: serde_json::Map<String, serde_json::Value>,
    /// Question name -> answered from cache.
    #[serde(default)]
    pub cache_used: BTreeMap<String, bool>,
}

impl TaskResult {
    /// Pricing key for this result.
    pub fn model_key(&self) -> ModelKey {
        ModelKey::new(&self.service, &self.model)
    }

    /// True when `question` was answered from cache.
    pub fn was_cached(&self, question: &str) -> bool {
        self.cache_used.get(question).copied().unwrap_or(false)
    }
}

/// Ordered collection of completed interview results.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResultSet {
    /// Results in submission order.
    #[serde(default)]
    pub results: Vec<TaskResult>,
}

impl ResultSet {
    /// Wraps results, preserving order.
    pub fn new(results: Vec<TaskResult>) -> Self {
        Self { results }
    }

    /// Number of results.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// True when no interview produced output.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Results in submission order.
    pub fn iter(&self) -> impl Iterator<Item = &TaskResult> {
        self.results.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn details(completed: u64, failed: u64) -> InterviewDetails {
        InterviewDetails {
            completed_interviews: completed,
            failed_interviews: failed,
            exception_summary: vec![],
        }
    }

    #[test]
    fn merge_replaces_rather_than_accumulates() {
        let mut outcome = InterviewOutcome::default();
        let d = details(3, 1);
        outcome.merge(&d, Some(10));
        outcome.merge(&d, Some(10));
        assert_eq!(outcome.completed_count, 3);
        assert_eq!(outcome.failed_count, 1);

        outcome.merge(&details(5, 0), Some(10));
        assert_eq!(outcome.completed_count, 5);
        assert_eq!(outcome.failed_count, 0);
    }

    #[test]
    fn merge_caps_at_submitted_count() {
        let mut outcome = InterviewOutcome::default();
        outcome.merge(&details(4, 3), Some(5));
        assert_eq!(outcome.completed_count, 4);
        assert_eq!(outcome.failed_count, 1);
    }

    #[test]
    fn status_parsing_is_lenient() {
        assert_eq!("Partially Failed".parse::<JobStatus>(), Ok(JobStatus::PartiallyFailed));
        assert_eq!("CANCELLING".parse::<JobStatus>(), Ok(JobStatus::Cancelling));
        assert!("exploded".parse::<JobStatus>().is_err());
    }
}
