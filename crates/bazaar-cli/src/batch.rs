//! Command batches
//!
//! A batch is a JSON array of `{"caller": ..., "call": {...}}` entries that
//! run in order until the first rejection.

use bazaar_projection::ErrorEnvelope;
use bazaar_state::{Command, CommandOutcome, Marketplace};
use bazaar_types::Address;
use serde::{Deserialize, Serialize};

/// One command and the address it runs as
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchEntry {
    pub caller: Address,
    pub call: Command,
}

/// What a batch run did
#[derive(Debug, Serialize)]
pub struct BatchReport {
    /// Entries that committed
    pub applied: usize,
    pub outcomes: Vec<CommandOutcome>,
    /// Rejection that stopped the batch, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorEnvelope>,
}

impl BatchReport {
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }
}

pub fn parse(json: &str) -> serde_json::Result<Vec<BatchEntry>> {
    serde_json::from_str(json)
}

/// Run entries in order, stopping at the first rejected one
///
/// Entries before the rejection stay committed.
pub async fn run(market: &Marketplace, entries: Vec<BatchEntry>) -> BatchReport {
    let mut outcomes = Vec::with_capacity(entries.len());

    for (index, entry) in entries.into_iter().enumerate() {
        let name = entry.call.name();
        match market.execute(entry.caller, entry.call).await {
            Ok(outcome) => outcomes.push(outcome),
            Err(err) => {
                tracing::warn!(index, command = name, code = err.error_code(), "batch stopped");
                let envelope = ErrorEnvelope::from(&err).with_details(serde_json::json!({
                    "index": index,
                    "command": name,
                }));
                return BatchReport {
                    applied: outcomes.len(),
                    outcomes,
                    error: Some(envelope),
                };
            }
        }
    }

    BatchReport {
        applied: outcomes.len(),
        outcomes,
        error: None,
    }
}
