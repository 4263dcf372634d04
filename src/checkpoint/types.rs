//! Persisted progress markers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Ordered filter map that scopes a run.
///
/// Keys are kept sorted so the canonical JSON, and therefore the hash, does
/// not depend on insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Filters(BTreeMap<String, Value>);

impl Filters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn canonical_json(&self) -> String {
        // BTreeMap<String, Value> always serializes
        serde_json::to_string(&self.0).unwrap_or_default()
    }

    /// Hex SHA-256 of the canonical JSON, used as the store key
    pub fn hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.canonical_json().as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

impl fmt::Display for Filters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical_json())
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Filters {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Progress of a run, written after every committed batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryState {
    pub last_batch_index: u64,
    pub processed_count: u64,
    #[serde(default)]
    pub skipped_count: u64,
    pub error_count: u64,
    pub total_count: u64,
    /// Number of source items consumed so far
    #[serde(default)]
    pub items_consumed: u64,
    pub filters: Filters,
    pub timestamp_created: DateTime<Utc>,
}

impl RecoveryState {
    pub fn new(filters: Filters, total_count: u64) -> Self {
        Self {
            last_batch_index: 0,
            processed_count: 0,
            skipped_count: 0,
            error_count: 0,
            total_count,
            items_consumed: 0,
            filters,
            timestamp_created: Utc::now(),
        }
    }
}
