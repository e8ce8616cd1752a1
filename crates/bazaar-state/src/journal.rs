//! Hash-chained journal of committed events
//!
//! Every committed event is wrapped in an [`EventRecord`] whose hash covers
//! the previous record's hash. An indexer that replays the stream can
//! verify it saw every event, in order, unmodified.

use std::collections::VecDeque;

use bazaar_types::MarketEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{StateError, StateResult};

/// Hash the first record chains from
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// A committed event with its position in the chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: Uuid,
    /// Position in the journal, starting at 1
    pub sequence: u64,
    pub previous_hash: String,
    pub hash: String,
    pub emitted_at: DateTime<Utc>,
    pub event: MarketEvent,
}

impl EventRecord {
    fn new(sequence: u64, previous_hash: String, event: MarketEvent) -> Self {
        let mut record = Self {
            id: Uuid::new_v4(),
            sequence,
            previous_hash,
            hash: String::new(),
            emitted_at: Utc::now(),
            event,
        };
        record.hash = record.compute_hash();
        record
    }

    /// Compute hash of this record
    pub fn compute_hash(&self) -> String {
        let content = format!(
            "{}:{}:{}:{}:{:?}",
            self.previous_hash,
            self.sequence,
            self.id,
            self.emitted_at.timestamp_nanos_opt().unwrap_or_default(),
            self.event
        );
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Verify the record hash
    pub fn verify(&self) -> bool {
        self.hash == self.compute_hash()
    }
}

/// Where the chain currently ends. Persisted with snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalHead {
    /// Sequence of the last committed record, 0 before the first
    pub sequence: u64,
    pub hash: String,
}

impl Default for JournalHead {
    fn default() -> Self {
        Self {
            sequence: 0,
            hash: GENESIS_HASH.to_string(),
        }
    }
}

/// Append-only event journal keeping a bounded window of recent records
#[derive(Debug, Clone)]
pub struct Journal {
    head: JournalHead,
    recent: VecDeque<EventRecord>,
    capacity: usize,
}

impl Journal {
    pub fn new(capacity: usize) -> Self {
        Self::resume(JournalHead::default(), capacity)
    }

    /// Continue a chain from a persisted head
    pub fn resume(head: JournalHead, capacity: usize) -> Self {
        Self {
            head,
            recent: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Commit one event
    pub fn append(&mut self, event: MarketEvent) -> EventRecord {
        let record = EventRecord::new(self.head.sequence + 1, self.head.hash.clone(), event);
        self.head = JournalHead {
            sequence: record.sequence,
            hash: record.hash.clone(),
        };

        if self.recent.len() == self.capacity {
            self.recent.pop_front();
        }
        self.recent.push_back(record.clone());
        record
    }

    pub fn head(&self) -> &JournalHead {
        &self.head
    }

    /// Most recent records, oldest first
    pub fn recent(&self, limit: usize) -> Vec<EventRecord> {
        let skip = self.recent.len().saturating_sub(limit);
        self.recent.iter().skip(skip).cloned().collect()
    }

    /// Records committed after `sequence` that are still held in memory
    pub fn since(&self, sequence: u64) -> Vec<EventRecord> {
        self.recent
            .iter()
            .filter(|r| r.sequence > sequence)
            .cloned()
            .collect()
    }
}

/// Check that `records` form an unbroken chain starting from `from`
pub fn verify_chain(from: &JournalHead, records: &[EventRecord]) -> StateResult<JournalHead> {
    let mut head = from.clone();
    for record in records {
        if record.sequence != head.sequence + 1 || record.previous_hash != head.hash || !record.verify() {
            return Err(StateError::BrokenChain {
                sequence: record.sequence,
            });
        }
        head = JournalHead {
            sequence: record.sequence,
            hash: record.hash.clone(),
        };
    }
    Ok(head)
}
