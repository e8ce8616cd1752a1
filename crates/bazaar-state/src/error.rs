//! State layer errors

use bazaar_types::MarketError;
use thiserror::Error;

/// Errors from loading, saving and migrating marketplace state
#[derive(Error, Debug)]
pub enum StateError {
    #[error("Market error: {0}")]
    Market(#[from] MarketError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unsupported snapshot schema version {found} (latest is {latest})")]
    UnsupportedSchema { found: u32, latest: u32 },

    #[error("Migration from schema version {from} failed: {reason}")]
    Migration { from: u32, reason: String },

    #[error("Journal chain broken at sequence {sequence}")]
    BrokenChain { sequence: u64 },
}

impl StateError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Market(err) => err.error_code(),
            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::UnsupportedSchema { .. } => "UNSUPPORTED_SCHEMA",
            Self::Migration { .. } => "MIGRATION_FAILED",
            Self::BrokenChain { .. } => "BROKEN_CHAIN",
        }
    }
}

pub type StateResult<T> = std::result::Result<T, StateError>;
