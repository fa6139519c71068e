//! ArtifactMetadata - provenance record attached to every artifact
//!
//! A flat key/scalar mapping describing the configuration that produced an
//! artifact. The `createdAt` key is reserved: it is stamped at persistence
//! time and never compared.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Sidecar key holding the persistence timestamp
pub const CREATED_AT_KEY: &str = "createdAt";

/// Format of the `createdAt` timestamp (local time, second resolution)
pub const SIDECAR_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Scalar metadata value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl MetadataValue {
    /// JSON form used inside sidecar files
    pub fn to_json(&self) -> Value {
        match self {
            Self::Bool(b) => Value::Bool(*b),
            Self::Integer(i) => Value::from(*i),
            Self::Float(f) => Value::from(*f),
            Self::Text(s) => Value::String(s.clone()),
        }
    }

    /// Whether a value loaded from a sidecar equals this one
    pub fn matches(&self, stored: &Value) -> bool {
        match (self, stored) {
            (Self::Float(a), Value::Number(n)) => n.as_f64() == Some(*a),
            _ => self.to_json() == *stored,
        }
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for MetadataValue {
    fn from(value: i32) -> Self {
        Self::Integer(value.into())
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Provenance record for one artifact
///
/// Equivalence is one-directional: a record is satisfied by a stored sidecar
/// when every key of the record is present in the sidecar with an equal value.
/// The sidecar may carry extra keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactMetadata {
    entries: BTreeMap<String, MetadataValue>,
}

impl ArtifactMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<MetadataValue>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&MetadataValue> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetadataValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Combine two records; keys of `other` win
    pub fn merged(&self, other: &ArtifactMetadata) -> ArtifactMetadata {
        let mut entries = self.entries.clone();
        entries.extend(other.entries.clone());
        Self { entries }
    }

    /// First key whose value is absent from or different in `stored`
    ///
    /// `createdAt` is never compared.
    pub fn first_mismatch<'a>(&'a self, stored: &Map<String, Value>) -> Option<&'a str> {
        self.entries
            .iter()
            .filter(|(key, _)| key.as_str() != CREATED_AT_KEY)
            .find(|(key, value)| match stored.get(key.as_str()) {
                Some(old) => !value.matches(old),
                None => true,
            })
            .map(|(key, _)| key.as_str())
    }

    /// Whether `stored` carries an equivalent value for every key of this record
    pub fn is_satisfied_by(&self, stored: &Map<String, Value>) -> bool {
        self.first_mismatch(stored).is_none()
    }

    /// JSON object form (without `createdAt`)
    pub fn to_json_map(&self) -> Map<String, Value> {
        self.entries
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect()
    }
}

impl<K, V> FromIterator<(K, V)> for ArtifactMetadata
where
    K: Into<String>,
    V: Into<MetadataValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut metadata = Self::new();
        for (k, v) in iter {
            metadata.insert(k, v);
        }
        metadata
    }
}
