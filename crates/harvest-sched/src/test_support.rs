//! In-memory executor and registry doubles for crate tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use harvest_executor::{
    Executor, ExecutorError, ExecutorJob, RegistryError, SubmitParams, Target, TargetRegistry,
};

/// Records submissions/cancellations; `unreachable` makes every call fail.
#[derive(Default)]
pub struct MockExecutor {
    pub submitted: Mutex<Vec<SubmitParams>>,
    pub cancelled: Mutex<Vec<String>>,
    pub listing: Mutex<Vec<ExecutorJob>>,
    pub unreachable: AtomicBool,
}

impl MockExecutor {
    pub fn submitted_ids(&self) -> Vec<String> {
        self.submitted
            .lock()
            .unwrap()
            .iter()
            .map(|p| p.job_id.clone())
            .collect()
    }

    pub fn cancelled_ids(&self) -> Vec<String> {
        self.cancelled.lock().unwrap().clone()
    }

    fn check_reachable(&self) -> Result<(), ExecutorError> {
        if self.unreachable.load(Ordering::SeqCst) {
            Err(ExecutorError::Rejected("executor unreachable".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Executor for MockExecutor {
    async fn submit(&self, params: &SubmitParams) -> Result<(), ExecutorError> {
        self.check_reachable()?;
        self.submitted.lock().unwrap().push(params.clone());
        Ok(())
    }

    async fn cancel(&self, job_id: &str) -> Result<(), ExecutorError> {
        self.check_reachable()?;
        self.cancelled.lock().unwrap().push(job_id.to_string());
        Ok(())
    }

    async fn list_jobs(&self) -> Result<Vec<ExecutorJob>, ExecutorError> {
        self.check_reachable()?;
        Ok(self.listing.lock().unwrap().clone())
    }

    async fn health_check(&self) -> Result<(), ExecutorError> {
        self.check_reachable()
    }
}

/// Serves targets from a fixed map.
#[derive(Default)]
pub struct MockRegistry {
    pub targets: Mutex<HashMap<String, Target>>,
}

impl MockRegistry {
    pub fn with_target(id: &str, url: &str) -> Self {
        let registry = Self::default();
        registry.targets.lock().unwrap().insert(
            id.to_string(),
            Target {
                id: id.to_string(),
                url: url.to_string(),
                enabled: true,
            },
        );
        registry
    }
}

#[async_trait]
impl TargetRegistry for MockRegistry {
    async fn get_target(&self, id: &str) -> Result<Option<Target>, RegistryError> {
        Ok(self.targets.lock().unwrap().get(id).cloned())
    }
}
