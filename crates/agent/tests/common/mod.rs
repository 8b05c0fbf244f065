#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use jobrun_agent::client::{PreferenceClient, RemoteJobClient};
use jobrun_agent::local_runner::{InterviewExecutor, LocalExecutionRunner, RunEnvironment};
use jobrun_agent::{ExecutionError, RemoteExecutionCoordinator};
use jobrun_core::api::CreateJobResponse;
use jobrun_core::model::{
    ExceptionSummaryEntry, InterviewDetails, InterviewSpec, JobDescriptor, JobSnapshot, JobStatus,
    JobSubmission, ResultSet, TaskResult,
};
use serde_json::json;

pub const BASE_URL: &str = "https://jobs.test";

/// Remote service that replays a fixed list of status snapshots. The last
/// one repeats if polled past the end.
pub struct ScriptedRemote {
    statuses: Mutex<VecDeque<JobSnapshot>>,
    last: Mutex<Option<JobSnapshot>>,
    results: ResultSet,
    remote_enabled: Result<bool, String>,
    create_error: Option<String>,
    last_fresh: Mutex<Option<bool>>,
    pub creates: AtomicUsize,
    pub polls: AtomicUsize,
    pub fetches: AtomicUsize,
    pub preference_checks: AtomicUsize,
}

impl ScriptedRemote {
    pub fn new(statuses: Vec<JobSnapshot>) -> Self {
        Self {
            statuses: Mutex::new(statuses.into()),
            last: Mutex::new(None),
            results: sample_results(),
            remote_enabled: Ok(true),
            create_error: None,
            last_fresh: Mutex::new(None),
            creates: AtomicUsize::new(0),
            polls: AtomicUsize::new(0),
            fetches: AtomicUsize::new(0),
            preference_checks: AtomicUsize::new(0),
        }
    }

    pub fn remote_enabled(mut self, enabled: bool) -> Self {
        self.remote_enabled = Ok(enabled);
        self
    }

    pub fn preference_error(mut self, message: &str) -> Self {
        self.remote_enabled = Err(message.to_string());
        self
    }

    pub fn create_error(mut self, message: &str) -> Self {
        self.create_error = Some(message.to_string());
        self
    }

    /// `fresh` flag of the most recent create call.
    pub fn last_fresh(&self) -> Option<bool> {
        *self.last_fresh.lock().unwrap()
    }

    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn preference_checks(&self) -> usize {
        self.preference_checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteJobClient for ScriptedRemote {
    async fn create(&self, job: &JobDescriptor) -> anyhow::Result<CreateJobResponse> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        *self.last_fresh.lock().unwrap() = Some(job.submission.force_fresh);
        if let Some(message) = &self.create_error {
            anyhow::bail!("{message}");
        }
        Ok(CreateJobResponse::new("job-1"))
    }

    async fn get_status(&self, _job_id: &str) -> anyhow::Result<JobSnapshot> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let next = self.statuses.lock().unwrap().pop_front();
        let mut last = self.last.lock().unwrap();
        if let Some(snapshot) = next {
            *last = Some(snapshot);
        }
        last.clone()
            .ok_or_else(|| anyhow::anyhow!("no scripted status"))
    }

    async fn get_object(&self, _id: &str, _expected_type: &str) -> anyhow::Result<ResultSet> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.results.clone())
    }

    fn base_url(&self) -> Option<&str> {
        Some(BASE_URL)
    }
}

#[async_trait]
impl PreferenceClient for ScriptedRemote {
    async fn remote_inference_enabled(&self) -> anyhow::Result<bool> {
        self.preference_checks.fetch_add(1, Ordering::SeqCst);
        self.remote_enabled
            .clone()
            .map_err(|e| anyhow::anyhow!(e))
    }
}

/// Local runner that records calls and returns a canned result set.
#[derive(Default)]
pub struct CountingLocal {
    pub runs: AtomicUsize,
    pub missing: Vec<String>,
}

impl CountingLocal {
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LocalExecutionRunner for CountingLocal {
    fn verify_credentials(&self, _job: &JobDescriptor) -> Result<(), ExecutionError> {
        if self.missing.is_empty() {
            Ok(())
        } else {
            Err(ExecutionError::MissingCredentials {
                services: self.missing.clone(),
            })
        }
    }

    async fn run(&self, job: &JobDescriptor, env: &RunEnvironment) -> anyhow::Result<ResultSet> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        anyhow::ensure!(env.pool.is_some(), "no resource pool attached");
        Ok(ResultSet::new(
            job.interviews
                .iter()
                .map(|i| TaskResult {
                    interview: i.name.clone(),
                    service: i.service.clone(),
                    model: i.model.clone(),
                    ..Default::default()
                })
                .collect(),
        ))
    }
}

/// Executor answering every interview with one priced question.
#[derive(Default)]
pub struct EchoExecutor {
    pub calls: AtomicUsize,
    pub delay: Option<Duration>,
    pub fail_on: Option<String>,
}

impl EchoExecutor {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InterviewExecutor for EchoExecutor {
    async fn execute(&self, interview: &InterviewSpec) -> anyhow::Result<TaskResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_on.as_deref() == Some(interview.name.as_str()) {
            anyhow::bail!("model refused");
        }
        Ok(priced_result(
            &interview.name,
            &interview.service,
            &interview.model,
        ))
    }
}

pub fn interview(name: &str, service: &str, model: &str) -> InterviewSpec {
    InterviewSpec {
        name: name.into(),
        service: service.into(),
        model: model.into(),
        payload: json!({"q1": "How are you?"}),
    }
}

pub fn job(interviews: Vec<InterviewSpec>) -> JobDescriptor {
    JobDescriptor {
        interviews,
        submission: JobSubmission::default(),
    }
}

/// Four interviews, as a typical small survey run.
pub fn sample_job() -> JobDescriptor {
    job(vec![
        interview("i1", "openai", "gpt-4o"),
        interview("i2", "openai", "gpt-4o"),
        interview("i3", "anthropic", "claude"),
        interview("i4", "anthropic", "claude"),
    ])
}

pub fn priced_result(name: &str, service: &str, model: &str) -> TaskResult {
    let mut result = TaskResult {
        interview: name.into(),
        service: service.into(),
        model: model.into(),
        ..Default::default()
    };
    result.answers.insert("q1".into(), json!("fine"));
    for (k, v) in [
        ("q1_cost", json!(0.0)),
        ("q1_input_tokens", json!(1000)),
        ("q1_output_tokens", json!(500)),
        ("q1_input_price_per_million_tokens", json!(2.5)),
        ("q1_output_price_per_million_tokens", json!(10.0)),
    ] {
        result.raw_model_response.insert(k.into(), v);
    }
    result
}

pub fn sample_results() -> ResultSet {
    ResultSet::new(vec![
        priced_result("i1", "openai", "gpt-4o"),
        priced_result("i3", "anthropic", "claude"),
    ])
}

pub fn snapshot(status: JobStatus) -> JobSnapshot {
    JobSnapshot::with_status(status)
}

pub fn with_counts(mut s: JobSnapshot, completed: u64, failed: u64) -> JobSnapshot {
    s.interview_details = Some(InterviewDetails {
        completed_interviews: completed,
        failed_interviews: failed,
        exception_summary: Vec::new(),
    });
    s
}

pub fn with_exceptions(mut s: JobSnapshot, entries: Vec<ExceptionSummaryEntry>) -> JobSnapshot {
    s.interview_details
        .get_or_insert_with(InterviewDetails::default)
        .exception_summary = entries;
    s
}

pub fn exception(question: &str, count: u64) -> ExceptionSummaryEntry {
    ExceptionSummaryEntry {
        exception_type: "LanguageModelNoResponseError".into(),
        inference_service: "openai".into(),
        model: "gpt-4o".into(),
        question_name: question.into(),
        count,
    }
}

pub fn with_results(mut s: JobSnapshot, id: &str) -> JobSnapshot {
    s.results_id = Some(id.into());
    s
}

pub fn with_reason(mut s: JobSnapshot, reason: &str) -> JobSnapshot {
    s.reason = Some(reason.into());
    s
}

pub fn coordinator(remote: &Arc<ScriptedRemote>) -> RemoteExecutionCoordinator {
    RemoteExecutionCoordinator::new(remote.clone()).with_poll_interval(Duration::from_millis(1))
}
