//! Config signatures

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::WorkerConfig;

/// SHA-256 digest of a canonicalised [`WorkerConfig`]
///
/// Object keys are sorted recursively before hashing, so neither struct
/// field order nor map insertion order changes the signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigSignature(String);

impl ConfigSignature {
    /// Compute the signature of a config
    pub fn compute(config: &WorkerConfig) -> Self {
        let value = serde_json::to_value(config).unwrap_or(Value::Null);
        Self::of_value(&value)
    }

    /// Compute the signature of an arbitrary JSON value
    pub fn of_value(value: &Value) -> Self {
        let canonical = canonicalize(value);
        let bytes = serde_json::to_vec(&canonical).unwrap_or_default();
        Self(hex::encode(Sha256::digest(&bytes)))
    }

    /// Accept a previously computed digest (64 hex characters)
    pub fn parse(hex_digest: &str) -> Option<Self> {
        let valid = hex_digest.len() == 64 && hex_digest.chars().all(|c| c.is_ascii_hexdigit());
        valid.then(|| Self(hex_digest.to_ascii_lowercase()))
    }

    /// Full hex digest
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Leading characters of the digest, for logs and status output
    pub fn prefix(&self, len: usize) -> &str {
        &self.0[..len.min(self.0.len())]
    }
}

impl fmt::Display for ConfigSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));

            let mut sorted = serde_json::Map::new();
            for (key, value) in entries {
                sorted.insert(key.clone(), canonicalize(value));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}
