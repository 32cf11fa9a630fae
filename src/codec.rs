//! Persisted envelope and the default JSON codec.
//!
//! Wire format: UTF-8 JSON text `{"state": <value>, "version": <integer>}`.
//! A missing `version` decodes to `None`; it is never coerced to `0`.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{PersistError, Result};

/// What gets written to storage: the (possibly partial) state and the
/// schema version it was written under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Persisted state.
    #[serde(default)]
    pub state: Value,
    /// Schema version tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
}

impl Envelope {
    /// Create an envelope tagged with `version`.
    pub fn new(state: Value, version: u32) -> Self {
        Self {
            state,
            version: Some(version),
        }
    }
}

/// Default serializer: JSON text.
pub fn serialize_json(envelope: &Envelope) -> Result<String> {
    serde_json::to_string(envelope).map_err(Into::into)
}

/// Default deserializer: JSON text.
pub fn deserialize_json(raw: &str) -> Result<Envelope> {
    serde_json::from_str(raw).map_err(Into::into)
}

/// Default migration: keep the stored state only when it was written under
/// the current version.
pub fn migrate_same_version(
    state: Value,
    stored_version: Option<u32>,
    current_version: u32,
) -> Result<Option<Value>> {
    if stored_version == Some(current_version) {
        Ok(Some(state))
    } else {
        Ok(None)
    }
}

/// Shape of a value for merging purposes.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeShape {
    /// A JSON object; merged key by key.
    Object(Map<String, Value>),
    /// Anything else; replaced wholesale.
    Scalar(Value),
}

impl From<Value> for MergeShape {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => MergeShape::Object(map),
            other => MergeShape::Scalar(other),
        }
    }
}

impl From<MergeShape> for Value {
    fn from(shape: MergeShape) -> Self {
        match shape {
            MergeShape::Object(map) => Value::Object(map),
            MergeShape::Scalar(value) => value,
        }
    }
}

/// Combine two values: a shallow key merge when both are objects (persisted
/// keys win), otherwise the persisted value replaces the initial one.
pub fn merge_values(initial: Value, persisted: Value) -> Value {
    match (MergeShape::from(initial), MergeShape::from(persisted)) {
        (MergeShape::Object(mut base), MergeShape::Object(overlay)) => {
            base.extend(overlay);
            Value::Object(base)
        }
        (_, persisted) => persisted.into(),
    }
}

/// Default merge for typed state: [`merge_values`] over the JSON form of the
/// initial state, decoded back into `T`.
pub fn merge_shallow<T>(initial: T, persisted: Value) -> Result<T>
where
    T: Serialize + DeserializeOwned,
{
    let base = serde_json::to_value(&initial)?;
    let merged = merge_values(base, persisted);
    serde_json::from_value(merged).map_err(|e| PersistError::Merge(e.to_string()))
}

/// Returns true if a migration result vetoes hydration.
pub(crate) fn is_veto(migrated: &Option<Value>) -> bool {
    matches!(migrated, None | Some(Value::Null))
}
