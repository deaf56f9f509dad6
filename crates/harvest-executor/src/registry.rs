//! Target registry HTTP client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use crate::{RegistryError, Target, TargetRegistry};

/// HTTP client for the scrape-target registry.
pub struct RegistryApi {
    client: Client,
    base_url: String,
}

impl RegistryApi {
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
}

#[async_trait]
impl TargetRegistry for RegistryApi {
    async fn get_target(&self, id: &str) -> Result<Option<Target>, RegistryError> {
        let resp = self
            .client
            .get(format!("{}/targets/{id}", self.base_url))
            .send()
            .await?;

        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(resp.json().await?)),
            status => Err(RegistryError::Unexpected(format!(
                "GET /targets/{id} returned {status}"
            ))),
        }
    }
}
