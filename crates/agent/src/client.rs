//! Collaborator contracts for the remote job service, plus an HTTP client.

use anyhow::Context;
use async_trait::async_trait;
use jobrun_core::api::{CreateJobRequest, CreateJobResponse, JobStatusResponse, RemotePreferences};
use jobrun_core::model::{JobDescriptor, JobSnapshot, ResultSet};

/// Object type requested when fetching job output.
pub const RESULTS_OBJECT_TYPE: &str = "results";

/// Submit / status / fetch calls against the remote service.
#[async_trait]
pub trait RemoteJobClient: Send + Sync {
    /// Creates a job for `job` and returns its id.
    async fn create(&self, job: &JobDescriptor) -> anyhow::Result<CreateJobResponse>;

    /// One status poll.
    async fn get_status(&self, job_id: &str) -> anyhow::Result<JobSnapshot>;

    /// Fetches a stored object, e.g. a job's results.
    async fn get_object(&self, id: &str, expected_type: &str) -> anyhow::Result<ResultSet>;

    /// Base URL for building links shown to users, if any.
    fn base_url(&self) -> Option<&str> {
        None
    }
}

/// Account preference lookups.
#[async_trait]
pub trait PreferenceClient: Send + Sync {
    /// Whether the account opted into remote inference.
    async fn remote_inference_enabled(&self) -> anyhow::Result<bool>;
}

/// JSON-over-HTTP implementation of both client contracts.
#[derive(Debug, Clone)]
pub struct HttpRemoteClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpRemoteClient {
    /// Client for the service at `base_url`.
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v0/{}", self.base_url, path)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }
}

#[async_trait]
impl RemoteJobClient for HttpRemoteClient {
    async fn create(&self, job: &JobDescriptor) -> anyhow::Result<CreateJobResponse> {
        let req = CreateJobRequest::from(job);
        let resp: CreateJobResponse = self
            .authorize(self.http.post(self.url("remote-inference")))
            .json(&req)
            .send()
            .await
            .context("submit job")?
            .error_for_status()?
            .json()
            .await
            .context("decode create response")?;
        Ok(resp)
    }

    async fn get_status(&self, job_id: &str) -> anyhow::Result<JobSnapshot> {
        let resp: JobStatusResponse = self
            .authorize(self.http.get(self.url(&format!("remote-inference/{job_id}"))))
            .send()
            .await
            .with_context(|| format!("fetch status for job {job_id}"))?
            .error_for_status()?
            .json()
            .await
            .context("decode status response")?;
        Ok(JobSnapshot::try_from(resp)?)
    }

    async fn get_object(&self, id: &str, expected_type: &str) -> anyhow::Result<ResultSet> {
        let results: ResultSet = self
            .authorize(self.http.get(self.url(&format!("objects/{expected_type}/{id}"))))
            .send()
            .await
            .with_context(|| format!("fetch {expected_type} {id}"))?
            .error_for_status()?
            .json()
            .await
            .with_context(|| format!("decode {expected_type} {id}"))?;
        Ok(results)
    }

    fn base_url(&self) -> Option<&str> {
        Some(&self.base_url)
    }
}

#[async_trait]
impl PreferenceClient for HttpRemoteClient {
    async fn remote_inference_enabled(&self) -> anyhow::Result<bool> {
        let prefs: RemotePreferences = self
            .authorize(self.http.get(self.url("users/preferences")))
            .send()
            .await
            .context("fetch preferences")?
            .error_for_status()?
            .json()
            .await
            .context("decode preferences")?;
        Ok(prefs.remote_inference)
    }
}
