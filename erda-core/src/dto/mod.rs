//! Data Transfer Objects
//!
//! Request and response types of the pipeline HTTP API, shared by the
//! service, the client and the CLI.

pub mod cms;
pub mod pipeline;

use serde::{Deserialize, Serialize};

/// Uniform response body: `{success, data}` or `{success: false, err}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<ErrorBody>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub msg: String,
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            err: None,
        }
    }

    pub fn error(code: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            err: Some(ErrorBody {
                code: code.into(),
                msg: msg.into(),
            }),
        }
    }
}

/// Caller identity. At least one of the two must be present for mutations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Identity {
    pub user_id: Option<String>,
    pub internal_client: Option<String>,
}

impl Identity {
    pub fn is_empty(&self) -> bool {
        self.user_id.as_deref().is_none_or(str::is_empty)
            && self.internal_client.as_deref().is_none_or(str::is_empty)
    }

    /// Fill unset fields from another identity (e.g. request headers)
    pub fn or(mut self, fallback: Identity) -> Identity {
        if self.user_id.is_none() {
            self.user_id = fallback.user_id;
        }
        if self.internal_client.is_none() {
            self.internal_client = fallback.internal_client;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_shapes() {
        let ok = serde_json::to_value(Envelope::ok(1)).unwrap();
        assert_eq!(ok, serde_json::json!({"success": true, "data": 1}));

        let err = serde_json::to_value(Envelope::<()>::error("ErrX.NotFound", "gone")).unwrap();
        assert_eq!(
            err,
            serde_json::json!({"success": false, "err": {"code": "ErrX.NotFound", "msg": "gone"}})
        );
    }

    #[test]
    fn test_identity() {
        assert!(Identity::default().is_empty());
        let header = Identity {
            user_id: Some("2".into()),
            internal_client: None,
        };
        let merged = Identity::default().or(header);
        assert_eq!(merged.user_id.as_deref(), Some("2"));
        assert!(!merged.is_empty());
    }
}
