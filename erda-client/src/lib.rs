//! erda Pipeline HTTP Client
//!
//! A type-safe HTTP client for the pipeline service API. Used by the CLI and
//! by a center node forwarding requests to an edge cluster.
//!
//! # Example
//!
//! ```no_run
//! use erda_client::PipelineClient;
//! use erda_core::dto::pipeline::CreatePipelineRequestV2;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = PipelineClient::new("http://localhost:3081");
//!
//!     let pipeline = client.create_pipeline_v2(&CreatePipelineRequestV2 {
//!         pipeline_yml: "version: \"1.1\"\nstages: []".to_string(),
//!         pipeline_source: "dice".to_string(),
//!         cluster_name: "local".to_string(),
//!         ..Default::default()
//!     }).await?;
//!
//!     println!("Created pipeline: {}", pipeline.id);
//!     Ok(())
//! }
//! ```

mod cms;
pub mod error;
mod pipelines;

pub use error::{ClientError, Result};

use erda_core::dto::Envelope;
use reqwest::Client;
use serde::de::DeserializeOwned;

/// HTTP client for the pipeline service API
#[derive(Debug, Clone)]
pub struct PipelineClient {
    /// Base URL of the pipeline service (e.g., "http://localhost:3081")
    base_url: String,
    /// HTTP client instance
    client: Client,
}

impl PipelineClient {
    /// Create a new pipeline client
    ///
    /// # Example
    /// ```
    /// use erda_client::PipelineClient;
    ///
    /// let client = PipelineClient::new("http://localhost:3081");
    /// ```
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create a new pipeline client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    ///
    /// # Example
    /// ```
    /// use erda_client::PipelineClient;
    /// use reqwest::Client;
    /// use std::time::Duration;
    ///
    /// let http_client = Client::builder()
    ///     .timeout(Duration::from_secs(5))
    ///     .build()
    ///     .unwrap();
    ///
    /// let client = PipelineClient::with_client("http://edge-1:3081", http_client);
    /// ```
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Get the base URL of the pipeline service
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Unwrap the response envelope and deserialize its data
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        self.unwrap_envelope::<T>(response)
            .await?
            .ok_or_else(|| ClientError::ParseError("response envelope carries no data".to_string()))
    }

    /// Handle a response whose envelope carries no data (e.g. cancel, delete)
    async fn handle_empty_response(&self, response: reqwest::Response) -> Result<()> {
        self.unwrap_envelope::<serde_json::Value>(response)
            .await
            .map(|_| ())
    }

    async fn unwrap_envelope<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<Option<T>> {
        let status = response.status();
        let body = response.text().await?;

        let envelope: Envelope<T> = match serde_json::from_str(&body) {
            Ok(envelope) => envelope,
            Err(_) if !status.is_success() => {
                return Err(ClientError::api_error(status.as_u16(), "", body));
            }
            Err(e) => {
                return Err(ClientError::ParseError(format!(
                    "Failed to parse JSON response: {}",
                    e
                )));
            }
        };

        if !envelope.success || !status.is_success() {
            let (code, msg) = envelope
                .err
                .map(|e| (e.code, e.msg))
                .unwrap_or_else(|| (String::new(), "Unknown error".to_string()));
            tracing::debug!("pipeline API error {}: {} ({})", status, msg, code);
            return Err(ClientError::api_error(status.as_u16(), code, msg));
        }

        Ok(envelope.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = PipelineClient::new("http://localhost:3081");
        assert_eq!(client.base_url(), "http://localhost:3081");
    }

    #[test]
    fn test_client_trims_trailing_slash() {
        let client = PipelineClient::new("http://localhost:3081/");
        assert_eq!(client.base_url(), "http://localhost:3081");
    }

    #[test]
    fn test_client_with_custom_client() {
        let http_client = Client::new();
        let client = PipelineClient::with_client("http://edge-1:3081", http_client);
        assert_eq!(client.base_url(), "http://edge-1:3081");
    }
}
