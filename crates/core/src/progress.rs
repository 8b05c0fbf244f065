//! Progress reporting seam between job coordination and whatever displays it.
//!
//! The coordinator only ever calls [`ProgressReporter::add_info`] and
//! [`ProgressReporter::update`]. Backends decide what to do with them and
//! keep their own snapshot of named fields.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::model::{JobStatus, ProgressEvent};
use crate::now_ms;

/// Named fields a reporter may be told about.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum InfoKey {
    /// Remote job id.
    JobId,
    /// Id of the stored results.
    ResultsId,
    /// Page showing live progress.
    ProgressUrl,
    /// Page showing the results.
    ResultsUrl,
    /// Failure report.
    ErrorReportUrl,
    /// Completed interview count.
    CompletedInterviews,
    /// Failed interview count.
    FailedInterviews,
    /// Exceptions grouped by type, model and question.
    ExceptionSummary,
    /// Per-model cost breakdown.
    ModelCosts,
}

impl InfoKey {
    /// Snake-case field name.
    pub fn as_str(self) -> &'static str {
        match self {
            InfoKey::JobId => "job_id",
            InfoKey::ResultsId => "results_id",
            InfoKey::ProgressUrl => "progress_url",
            InfoKey::ResultsUrl => "results_url",
            InfoKey::ErrorReportUrl => "error_report_url",
            InfoKey::CompletedInterviews => "completed_interviews",
            InfoKey::FailedInterviews => "failed_interviews",
            InfoKey::ExceptionSummary => "exception_summary",
            InfoKey::ModelCosts => "model_costs",
        }
    }
}

/// Observer for job status updates.
pub trait ProgressReporter: Send + Sync {
    /// Sets (or replaces) a named field.
    fn add_info(&self, key: InfoKey, value: serde_json::Value);

    /// Emits a human-readable status message.
    fn update(&self, message: &str, status: JobStatus);
}

/// Last value seen for each [`InfoKey`].
pub type InfoSnapshot = BTreeMap<InfoKey, serde_json::Value>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {
    fn add_info(&self, _key: InfoKey, _value: serde_json::Value) {}
    fn update(&self, _message: &str, _status: JobStatus) {}
}

/// Writes updates to `tracing`, for batch scripts and daemons.
#[derive(Debug, Default)]
pub struct TracingReporter {
    info: Mutex<InfoSnapshot>,
}

impl TracingReporter {
    /// Fresh reporter with an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the named fields seen so far.
    pub fn snapshot(&self) -> InfoSnapshot {
        lock(&self.info).clone()
    }
}

impl ProgressReporter for TracingReporter {
    fn add_info(&self, key: InfoKey, value: serde_json::Value) {
        tracing::debug!(key = key.as_str(), value = %value, "job info");
        lock(&self.info).insert(key, value);
    }

    fn update(&self, message: &str, status: JobStatus) {
        let job_id = lock(&self.info)
            .get(&InfoKey::JobId)
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        match status {
            JobStatus::Failed | JobStatus::Cancelled => {
                tracing::warn!(%job_id, %status, "{message}")
            }
            _ => tracing::info!(%job_id, %status, "{message}"),
        }
    }
}

/// Keeps an append-only event log plus the info snapshot in memory.
#[derive(Debug, Default)]
pub struct MemoryReporter {
    events: Mutex<Vec<ProgressEvent>>,
    info: Mutex<InfoSnapshot>,
}

impl MemoryReporter {
    /// Empty reporter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Events in emission order.
    pub fn events(&self) -> Vec<ProgressEvent> {
        lock(&self.events).clone()
    }

    /// Just the messages, in emission order.
    pub fn messages(&self) -> Vec<String> {
        lock(&self.events).iter().map(|e| e.message.clone()).collect()
    }

    /// Statuses reported with each event.
    pub fn statuses(&self) -> Vec<JobStatus> {
        lock(&self.events).iter().map(|e| e.status).collect()
    }

    /// Last value recorded for `key`.
    pub fn info(&self, key: InfoKey) -> Option<serde_json::Value> {
        lock(&self.info).get(&key).cloned()
    }

    /// Copy of all named fields.
    pub fn snapshot(&self) -> InfoSnapshot {
        lock(&self.info).clone()
    }
}

impl ProgressReporter for MemoryReporter {
    fn add_info(&self, key: InfoKey, value: serde_json::Value) {
        lock(&self.info).insert(key, value);
    }

    fn update(&self, message: &str, status: JobStatus) {
        lock(&self.events).push(ProgressEvent {
            message: message.to_string(),
            status,
            timestamp_ms: now_ms(),
        });
    }
}

/// Which backend to build at the process boundary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReporterKind {
    /// [`TracingReporter`].
    #[default]
    Log,
    /// [`SilentReporter`].
    Silent,
    /// [`MemoryReporter`].
    Memory,
}

/// Builds the reporter chosen once by the caller.
pub fn reporter_for(kind: ReporterKind) -> Arc<dyn ProgressReporter> {
    match kind {
        ReporterKind::Log => Arc::new(TracingReporter::new()),
        ReporterKind::Silent => Arc::new(SilentReporter),
        ReporterKind::Memory => Arc::new(MemoryReporter::new()),
    }
}
