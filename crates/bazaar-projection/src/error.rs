//! Uniform error envelope

use bazaar_types::MarketError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Error details as served to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

/// `{"error": {...}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
    /// HTTP status the envelope is served with
    #[serde(skip)]
    pub status: u16,
}

impl ErrorEnvelope {
    pub fn new(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorBody {
                code: code.into(),
                message: message.into(),
                timestamp: Utc::now(),
                details: None,
                stack: None,
            },
            status,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.error.details = Some(details);
        self
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(500, "INTERNAL_ERROR", message)
    }
}

/// HTTP status for a core error
pub fn status_code(err: &MarketError) -> u16 {
    match err {
        MarketError::InvalidInput { .. } => 400,
        MarketError::AccessDenied { .. } => 403,
        MarketError::NotFound { .. } => 404,
        MarketError::AlreadyExists { .. } | MarketError::InvalidState { .. } => 409,
        MarketError::InsufficientFunds { .. } | MarketError::TransferFailed { .. } => 422,
        MarketError::Unsupported { .. } => 501,
    }
}

impl From<&MarketError> for ErrorEnvelope {
    fn from(err: &MarketError) -> Self {
        let details = match err {
            MarketError::NotFound { entity, id } | MarketError::AlreadyExists { entity, id } => {
                Some(serde_json::json!({ "entity": entity, "id": id }))
            }
            MarketError::InvalidState { entity, id, .. } => {
                Some(serde_json::json!({ "entity": entity, "id": id }))
            }
            MarketError::InsufficientFunds {
                account,
                requested,
                available,
            } => Some(serde_json::json!({
                "account": account,
                "requested": requested.to_string(),
                "available": available.to_string(),
            })),
            MarketError::InvalidInput { field, .. } => Some(serde_json::json!({ "field": field })),
            _ => None,
        };

        let envelope = Self::new(status_code(err), err.error_code(), err.to_string());
        match details {
            Some(details) => envelope.with_details(details),
            None => envelope,
        }
    }
}

impl From<MarketError> for ErrorEnvelope {
    fn from(err: MarketError) -> Self {
        Self::from(&err)
    }
}
