//! Tool execution against the business backend

use async_trait::async_trait;
use std::time::Duration;

use steward_core::error::Result as CoreResult;
use steward_core::{StewardError, ToolExecutor};

/// Executes tools by POSTing to the property-management backend with a
/// service credential
#[derive(Debug, Clone)]
pub struct HttpToolExecutor {
    client: reqwest::Client,
    base_url: String,
    service_token: String,
}

impl HttpToolExecutor {
    /// Create an executor against the backend base URL
    pub fn new(base_url: impl Into<String>, service_token: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into(),
            service_token: service_token.into(),
        }
    }
}

#[async_trait]
impl ToolExecutor for HttpToolExecutor {
    async fn execute(
        &self,
        user_id: &str,
        tool_name: &str,
        arguments: &serde_json::Value,
    ) -> CoreResult<serde_json::Value> {
        let response = self
            .client
            .post(format!("{}/tools/{tool_name}", self.base_url))
            .bearer_auth(&self.service_token)
            .json(&serde_json::json!({
                "user_id": user_id,
                "arguments": arguments,
            }))
            .send()
            .await
            .map_err(|e| StewardError::Upstream(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(StewardError::Upstream(format!("{status}: {detail}")));
        }

        response
            .json()
            .await
            .map_err(|e| StewardError::Upstream(e.to_string()))
    }
}
