//! Executor service HTTP client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

use crate::{Executor, ExecutorError, ExecutorJob, SubmitParams};

/// Response envelope used by the executor service.
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub result: Option<T>,
}

/// HTTP client for the executor service.
pub struct ExecutorApi {
    client: Client,
    base_url: String,
}

impl ExecutorApi {
    /// Create a client against the given base URL with a bounded
    /// per-request timeout so an unreachable executor cannot stall
    /// schedule mutation.
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .expect("failed to build reqwest client");
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn unwrap_envelope<T>(resp: ApiResponse<T>) -> Result<Option<T>, ExecutorError> {
        if !resp.ok {
            return Err(ExecutorError::Rejected(
                resp.error.unwrap_or_else(|| "unknown error".into()),
            ));
        }
        Ok(resp.result)
    }
}

#[async_trait]
impl Executor for ExecutorApi {
    async fn submit(&self, params: &SubmitParams) -> Result<(), ExecutorError> {
        let resp: ApiResponse<Value> = self
            .client
            .post(format!("{}/jobs", self.base_url))
            .json(params)
            .send()
            .await?
            .json()
            .await?;
        Self::unwrap_envelope(resp)?;
        Ok(())
    }

    async fn cancel(&self, job_id: &str) -> Result<(), ExecutorError> {
        let resp: ApiResponse<Value> = self
            .client
            .post(format!("{}/jobs/{job_id}/cancel", self.base_url))
            .send()
            .await?
            .json()
            .await?;
        Self::unwrap_envelope(resp)?;
        Ok(())
    }

    async fn list_jobs(&self) -> Result<Vec<ExecutorJob>, ExecutorError> {
        let resp: ApiResponse<Vec<ExecutorJob>> = self
            .client
            .get(format!("{}/jobs", self.base_url))
            .send()
            .await?
            .json()
            .await?;
        Ok(Self::unwrap_envelope(resp)?.unwrap_or_default())
    }

    async fn health_check(&self) -> Result<(), ExecutorError> {
        let resp: ApiResponse<Value> = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await?
            .json()
            .await?;
        Self::unwrap_envelope(resp)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::JobStatus;

    #[test]
    fn test_base_url_normalized() {
        let api = ExecutorApi::new("http://executor:9301/", Duration::from_secs(5));
        assert_eq!(api.base_url, "http://executor:9301");
    }

    #[test]
    fn test_envelope_error() {
        let resp: ApiResponse<Value> =
            serde_json::from_str(r#"{"ok": false, "error": "queue full"}"#).unwrap();
        match ExecutorApi::unwrap_envelope(resp) {
            Err(ExecutorError::Rejected(msg)) => assert_eq!(msg, "queue full"),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_envelope_list() {
        let resp: ApiResponse<Vec<ExecutorJob>> = serde_json::from_str(
            r#"{"ok": true, "result": [
                {"id": "s1", "status": "running", "last_run": "2026-01-12T09:00:00Z"},
                {"id": "s2", "status": "idle"}
            ]}"#,
        )
        .unwrap();
        let jobs = ExecutorApi::unwrap_envelope(resp).unwrap().unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].status, JobStatus::Running);
        assert!(jobs[1].last_run.is_none());
    }
}
