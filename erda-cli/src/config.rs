//! Configuration module
//!
//! Handles CLI configuration including the service URL and caller identity.

use erda_core::dto::Identity;

/// CLI configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// URL of the pipeline service
    pub pipeline_url: String,
    pub user_id: Option<String>,
}

impl Config {
    /// Identity attached to mutating requests
    pub fn identity(&self) -> Identity {
        Identity {
            user_id: self.user_id.clone(),
            internal_client: Some("erda-cli".to_string()),
        }
    }
}
