//! Request/response shapes exchanged with the remote job service.

use serde::{Deserialize, Serialize};

use crate::model::{
    ExceptionSummaryEntry, InterviewDetails, InterviewSpec, JobDescriptor, JobSnapshot, JobStatus,
    ParseStatusError, Visibility,
};

/// Create-job request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreateJobRequest {
    /// Interviews of one iteration.
    pub interviews: Vec<InterviewSpec>,
    /// Times to run the collection.
    pub iterations: u32,
    /// Shown alongside the job.
    pub description: Option<String>,
    /// Who can see the job.
    pub visibility: Visibility,
    /// Skip the service's answer cache.
    pub fresh: bool,
}

impl From<&JobDescriptor> for CreateJobRequest {
    fn from(job: &JobDescriptor) -> Self {
        let sub = &job.submission;
        Self {
            interviews: job.interviews.clone(),
            iterations: sub.iterations,
            description: sub.description.clone(),
            visibility: sub.visibility,
            fresh: sub.force_fresh,
        }
    }
}

/// Create-job response. Fields other than `job_id` are kept verbatim as
/// creation info for the handle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreateJobResponse {
    /// Id to poll.
    pub job_id: String,
    /// Everything else the service returned.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl CreateJobResponse {
    /// Response carrying only a job id.
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            extra: Default::default(),
        }
    }
}

/// Status response, as sent by the service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobStatusResponse {
    /// Echoed job id.
    #[serde(default)]
    pub job_id: Option<String>,
    /// One of the [`JobStatus`] wire names.
    pub status: String,
    /// Failure or cancellation reason.
    #[serde(default)]
    pub reason: Option<String>,
    /// Set once output exists.
    #[serde(default)]
    pub results_id: Option<String>,
    /// Interviews finished so far.
    #[serde(default)]
    pub completed_interviews: Option<u64>,
    /// Interviews failed so far.
    #[serde(default)]
    pub failed_interviews: Option<u64>,
    /// Exceptions grouped by type, model and question.
    #[serde(default)]
    pub exception_summary: Option<Vec<ExceptionSummaryEntry>>,
    /// Link to a failure report.
    #[serde(default)]
    pub error_report_url: Option<String>,
}

impl TryFrom<JobStatusResponse> for JobSnapshot {
    type Error = ParseStatusError;

    fn try_from(resp: JobStatusResponse) -> Result<Self, Self::Error> {
        let status: JobStatus = resp.status.parse()?;

        // Interview counters are only meaningful when the service sent some.
        let interview_details = if resp.completed_interviews.is_some()
            || resp.failed_interviews.is_some()
            || resp.exception_summary.is_some()
        {
            Some(InterviewDetails {
                completed_interviews: resp.completed_interviews.unwrap_or(0),
                failed_interviews: resp.failed_interviews.unwrap_or(0),
                exception_summary: resp.exception_summary.unwrap_or_default(),
            })
        } else {
            None
        };

        Ok(JobSnapshot {
            status,
            reason: resp.reason.filter(|r| !r.is_empty()),
            results_id: resp.results_id.filter(|r| !r.is_empty()),
            interview_details,
            error_report_url: resp.error_report_url.filter(|u| !u.is_empty()),
        })
    }
}

/// Account preferences relevant to execution strategy.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemotePreferences {
    /// Remote inference opted in.
    #[serde(default)]
    pub remote_inference: bool,
}
