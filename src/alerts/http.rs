use super::generator::{InsightError, InsightGenerator, InsightPayload};
use async_trait::async_trait;

/// Posts the payload as JSON to an external insight service and returns the
/// response body untouched.
#[derive(Debug, Clone)]
pub struct HttpGenerator {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpGenerator {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into().trim().to_owned(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl InsightGenerator for HttpGenerator {
    async fn generate(&self, payload: &InsightPayload) -> Result<String, InsightError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(payload)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| InsightError::Failure(e.to_string()))?;

        response
            .text()
            .await
            .map_err(|e| InsightError::Failure(e.to_string()))
    }
}
