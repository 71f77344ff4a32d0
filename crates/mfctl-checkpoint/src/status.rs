use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

/// Terminal marker key.
pub const STATUS_KEY: &str = "status";
/// Value of [`STATUS_KEY`] once bootstrap has finished.
pub const READY_VALUE: &str = "ready";
/// Generic "stage done" value.
pub const DONE_VALUE: &str = "ok";

/// Stage-completion record: stage key to stage result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BootstrapStatus(BTreeMap<String, Value>);

impl BootstrapStatus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a stored document.
    ///
    /// Empty input, invalid JSON, and JSON that is not an object all read as
    /// an empty status.
    pub fn from_slice(bytes: &[u8]) -> Self {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Self::default();
        }
        match serde_json::from_slice(bytes) {
            Ok(status) => status,
            Err(err) => {
                warn!(error = %err, "bootstrap status is not a JSON object, treating as empty");
                Self::default()
            }
        }
    }

    pub fn to_vec(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(&self.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// String value of `key`, if present and a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Overwrite one key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Whether `status == "ready"`.
    pub fn is_ready(&self) -> bool {
        self.get_str(STATUS_KEY) == Some(READY_VALUE)
    }

    /// Whether `key` holds one of the `accepted` values.
    pub fn is_done(&self, key: &str, accepted: &[&str]) -> bool {
        self.get_str(key).is_some_and(|value| accepted.contains(&value))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

impl FromIterator<(String, Value)> for BootstrapStatus {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
