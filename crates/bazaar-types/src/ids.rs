//! Sequence-allocated identifiers
//!
//! Proposal and task ids come from explicit sequences that start at 1 and
//! only move forward when a record is actually written. An id is never
//! handed out twice, even after the record it named is removed.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Macro to generate sequence id types with common implementations
macro_rules! define_sequence_id {
    ($name:ident, $prefix:literal, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            /// The first id a fresh sequence hands out
            pub const FIRST: $name = $name(1);

            pub fn new(value: u64) -> Self {
                Self(value)
            }

            pub fn value(&self) -> u64 {
                self.0
            }

            /// The id following this one
            pub fn next(&self) -> Self {
                Self(self.0 + 1)
            }

            /// Convert to prefixed string
            pub fn to_prefixed_string(&self) -> String {
                format!("{}_{}", $prefix, self.0)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::FIRST
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let s = s.strip_prefix(concat!($prefix, "_")).unwrap_or(s);
                s.parse::<u64>().map(Self)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }
    };
}

define_sequence_id!(ProposalId, "proposal", "Identifier of a proposal published by an agent");
define_sequence_id!(TaskId, "task", "Identifier of an escrow-backed task");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequences_start_at_one() {
        assert_eq!(ProposalId::default(), ProposalId(1));
        assert_eq!(TaskId::default().next(), TaskId(2));
    }

    #[test]
    fn test_id_parsing() {
        assert_eq!("task_7".parse::<TaskId>().unwrap(), TaskId(7));
        assert_eq!("7".parse::<TaskId>().unwrap(), TaskId(7));
        assert_eq!(ProposalId(3).to_prefixed_string(), "proposal_3");
    }

    #[test]
    fn test_ids_as_json_map_keys() {
        let mut map = std::collections::BTreeMap::new();
        map.insert(TaskId(12), "x".to_string());
        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"12":"x"}"#);
        let back: std::collections::BTreeMap<TaskId, String> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, map);
    }
}
