//! Response shapes returned by the Vault KV v2 and ACL APIs.
//!
//! Vault does not promise every field on every response, so each shape is a
//! struct of optional fields that is checked before use.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Secret payload: arbitrary JSON object.
pub type SecretData = Map<String, Value>;

/// The outer `{ "data": ... }` wrapper Vault puts around most responses.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Envelope<T> {
    pub data: Option<T>,
}

/// `data` of a list response.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct KeyList {
    #[serde(default)]
    pub keys: Vec<String>,
}

/// `{ "errors": [...] }` body returned on non-2xx statuses.
#[derive(Debug, Deserialize)]
pub(crate) struct RemoteErrorBody {
    pub errors: Option<Vec<String>>,
}

/// `data` of a `GET {mount}/metadata/{path}` response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SecretMetadata {
    /// Raw `current_version` field; kept untyped so odd values don't fail the read.
    #[serde(default)]
    pub current_version: Option<Value>,
}

impl SecretMetadata {
    /// The current version when it is a positive integer.
    pub fn usable_version(&self) -> Option<u64> {
        self.current_version
            .as_ref()
            .and_then(Value::as_u64)
            .filter(|v| *v > 0)
    }
}

/// The full, unmodified envelope of a KV v2 read.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct SecretEnvelope(Value);

impl SecretEnvelope {
    pub(crate) fn new(raw: Value) -> Self {
        Self(raw)
    }

    /// The secret payload (`data.data`), or an empty map when absent.
    pub fn payload(&self) -> SecretData {
        self.0
            .get("data")
            .and_then(|d| d.get("data"))
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default()
    }

    /// Version of the returned payload, from `data.metadata.version` or
    /// `data.current_version`.
    pub fn version(&self) -> Option<u64> {
        let data = self.0.get("data")?;
        data.get("metadata")
            .and_then(|m| m.get("version"))
            .and_then(Value::as_u64)
            .or_else(|| data.get("current_version").and_then(Value::as_u64))
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

/// Which branch of the delete sequence ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum DeleteOutcome {
    /// The current version was marked deleted; history is preserved.
    SoftDeleted { version: u64 },
    /// No usable version was found, so all versions and metadata were removed.
    MetadataPurged,
    /// The path was outside the managed mount layout and was deleted verbatim.
    RawDeleted,
}

/// Result of [`KvClient::delete`](crate::kv::KvClient::delete).
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteResult {
    pub outcome: DeleteOutcome,
    /// Raw response of the final request (`Null` when the server sent none).
    pub response: Value,
}
