//! HTTP participant client.
//!
//! POSTs the action context as JSON to `{endpoint}/{operation}`. Retries are
//! left to the coordinator; this client only classifies outcomes.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, error, warn};

use crate::interfaces::participant::{
    ActionContext, Operation, ParticipantClient, ParticipantError, Rejection, Result,
};

/// HTTP participant configuration.
#[derive(Debug, Clone)]
pub struct HttpParticipantConfig {
    /// Routing name used by the coordinator.
    pub name: String,

    /// Base URL; the operation name is appended as a path segment.
    pub endpoint: String,

    /// Request timeout.
    pub timeout: Duration,
}

impl HttpParticipantConfig {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            timeout: Duration::from_secs(5),
        }
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Participant reached over HTTP.
pub struct HttpParticipantClient {
    client: Client,
    config: HttpParticipantConfig,
}

impl HttpParticipantClient {
    pub fn new(config: HttpParticipantConfig) -> Result<Self> {
        if config.endpoint.is_empty() {
            return Err(Rejection::Refused(format!(
                "participant {} has no endpoint",
                config.name
            ))
            .into());
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ParticipantError::Transient(e.to_string()))?;

        Ok(Self { client, config })
    }

    fn url(&self, operation: Operation) -> String {
        format!(
            "{}/{}",
            self.config.endpoint.trim_end_matches('/'),
            operation.name()
        )
    }

    /// Determine if a transport error is worth retrying.
    fn is_retryable(err: &reqwest::Error) -> bool {
        err.is_timeout() || err.is_connect()
    }

    /// Determine if an HTTP status code is worth retrying.
    fn is_retryable_status(status: StatusCode) -> bool {
        status == StatusCode::REQUEST_TIMEOUT
            || status == StatusCode::TOO_MANY_REQUESTS
            || status.is_server_error()
    }

    /// Map a response onto the participant error taxonomy.
    fn classify(status: StatusCode, body: &str) -> Result<()> {
        let body = body.trim();
        if status.is_success() {
            return match body {
                "" | "true" => Ok(()),
                // Zero rows affected: retrying the same request cannot change that.
                "false" => Err(Rejection::Refused(
                    "participant reported no rows affected".to_string(),
                )
                .into()),
                other => Err(ParticipantError::Transient(format!(
                    "unexpected acknowledgement: {}",
                    other.chars().take(200).collect::<String>()
                ))),
            };
        }

        let reason = if body.is_empty() {
            status.to_string()
        } else {
            body.chars().take(200).collect()
        };

        if status == StatusCode::CONFLICT || status == StatusCode::UNPROCESSABLE_ENTITY {
            Err(Rejection::Refused(reason).into())
        } else if Self::is_retryable_status(status) {
            Err(ParticipantError::Transient(format!("HTTP {} - {}", status, reason)))
        } else {
            Err(Rejection::Refused(format!("HTTP {} - {}", status, reason)).into())
        }
    }
}

#[async_trait]
impl ParticipantClient for HttpParticipantClient {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn call(&self, operation: Operation, context: &ActionContext) -> Result<()> {
        let url = self.url(operation);

        let response = match self.client.post(&url).json(context).send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => return Err(ParticipantError::Timeout(self.config.timeout)),
            Err(e) if Self::is_retryable(&e) => {
                warn!(participant = %self.config.name, url = %url, error = %e, "Participant unreachable");
                return Err(ParticipantError::Transient(e.to_string()));
            }
            Err(e) => {
                error!(participant = %self.config.name, url = %url, error = %e, "Participant request failed");
                return Err(ParticipantError::Transient(e.to_string()));
            }
        };

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let result = Self::classify(status, &body);

        match &result {
            Ok(()) => debug!(participant = %self.config.name, operation = %operation, "Participant acknowledged"),
            Err(e) if e.is_transient() => {
                warn!(participant = %self.config.name, operation = %operation, status = %status, error = %e, "Participant returned retryable status")
            }
            Err(e) => {
                warn!(participant = %self.config.name, operation = %operation, status = %status, error = %e, "Participant rejected operation")
            }
        }
        result
    }
}
