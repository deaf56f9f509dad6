//! harvest-executor: seams to the external services the scheduler talks to.
//!
//! The scheduler never fires jobs itself; the remote executor performs the
//! timed dispatch. This crate defines the [`Executor`] and [`TargetRegistry`]
//! traits injected into the schedule manager at startup, the wire types of
//! both services, and their HTTP implementations.

pub mod api;
pub mod registry;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use api::ExecutorApi;
pub use registry::RegistryApi;

/// A scrape target known to the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub id: String,
    pub url: String,
    pub enabled: bool,
}

/// Live status the executor reports for a registered job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Idle,
}

/// One entry of the executor's job listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorJob {
    pub id: String,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<DateTime<Utc>>,
}

/// Registration request for a timed dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitParams {
    pub job_id: String,
    pub next_run: DateTime<Utc>,
    pub url: String,
    pub config: serde_json::Value,
}

/// Failure talking to the executor service. A distinct class from
/// execution failures, which arrive through result reports; these never
/// block persistence of local schedule state.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("executor transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("executor rejected the request: {0}")]
    Rejected(String),
}

/// Failure talking to the target registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("registry transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("registry returned an unexpected response: {0}")]
    Unexpected(String),
}

/// The external service that performs timed dispatch of scrape jobs.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Register (or refresh) a job for dispatch at `params.next_run`.
    async fn submit(&self, params: &SubmitParams) -> Result<(), ExecutorError>;
    /// Drop a job's registration. Cancelling an unknown job is an ack.
    async fn cancel(&self, job_id: &str) -> Result<(), ExecutorError>;
    /// Snapshot of every job the executor knows, with live status.
    async fn list_jobs(&self) -> Result<Vec<ExecutorJob>, ExecutorError>;
    /// Reachability probe, used once at startup.
    async fn health_check(&self) -> Result<(), ExecutorError>;
}

/// The external registry of scrape targets.
#[async_trait]
pub trait TargetRegistry: Send + Sync {
    async fn get_target(&self, id: &str) -> Result<Option<Target>, RegistryError>;
}
