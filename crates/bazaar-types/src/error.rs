//! Error types for Bazaar
//!
//! Every error aborts the whole operation. No partial state survives a
//! failed call and the core never retries on its own.

use thiserror::Error;

/// Result type for Bazaar operations
pub type Result<T> = std::result::Result<T, MarketError>;

/// Bazaar error taxonomy
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MarketError {
    /// Caller lacks the required ownership or role
    #[error("Access denied: {reason}")]
    AccessDenied { reason: String },

    /// Referenced entity does not exist, is inactive, or is unregistered
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    /// Duplicate registration
    #[error("{entity} {id} already exists")]
    AlreadyExists { entity: &'static str, id: String },

    /// Operation not valid for the entity's current lifecycle state
    #[error("Invalid state for {entity} {id}: {reason}")]
    InvalidState {
        entity: &'static str,
        id: String,
        reason: String,
    },

    /// Balance or escrow shortfall
    #[error("Insufficient funds in {account}: requested {requested}, available {available}")]
    InsufficientFunds {
        account: String,
        requested: u128,
        available: u128,
    },

    /// External fund movement did not complete
    #[error("Transfer failed: {reason}")]
    TransferFailed { reason: String },

    /// Deliberately disabled operation
    #[error("Unsupported operation: {operation}")]
    Unsupported { operation: String },

    /// Malformed argument (zero price, rating out of range, overflow)
    #[error("Invalid input: {field} - {reason}")]
    InvalidInput { field: String, reason: String },
}

impl MarketError {
    pub fn access_denied(reason: impl Into<String>) -> Self {
        Self::AccessDenied {
            reason: reason.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn already_exists(entity: &'static str, id: impl ToString) -> Self {
        Self::AlreadyExists {
            entity,
            id: id.to_string(),
        }
    }

    pub fn invalid_state(entity: &'static str, id: impl ToString, reason: impl Into<String>) -> Self {
        Self::InvalidState {
            entity,
            id: id.to_string(),
            reason: reason.into(),
        }
    }

    pub fn transfer_failed(reason: impl Into<String>) -> Self {
        Self::TransferFailed {
            reason: reason.into(),
        }
    }

    pub fn unsupported(operation: impl Into<String>) -> Self {
        Self::Unsupported {
            operation: operation.into(),
        }
    }

    pub fn invalid_input(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Stable error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::AccessDenied { .. } => "ACCESS_DENIED",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::AlreadyExists { .. } => "ALREADY_EXISTS",
            Self::InvalidState { .. } => "INVALID_STATE",
            Self::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            Self::TransferFailed { .. } => "TRANSFER_FAILED",
            Self::Unsupported { .. } => "UNSUPPORTED",
            Self::InvalidInput { .. } => "INVALID_INPUT",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(MarketError::access_denied("x").error_code(), "ACCESS_DENIED");
        assert_eq!(MarketError::not_found("agent", "0x1").error_code(), "NOT_FOUND");
        assert_eq!(MarketError::unsupported("transfer").error_code(), "UNSUPPORTED");
    }

    #[test]
    fn test_messages_carry_context() {
        let err = MarketError::invalid_state("task", 4, "task is Completed");
        assert_eq!(err.to_string(), "Invalid state for task 4: task is Completed");

        let err = MarketError::InsufficientFunds {
            account: "holder:0x01".to_string(),
            requested: 100,
            available: 40,
        };
        assert!(err.to_string().contains("requested 100, available 40"));
    }
}
