//! KV v2 secrets engine operations.
//!
//! Callers pass paths relative to the mount (`app/config`); the client
//! inserts the `data`, `metadata` or `delete` segment for each operation.
//!
//! # Delete sequence
//!
//! Vault's soft-delete endpoint needs an explicit version list and has no
//! "latest" shortcut, so [`KvClient::delete`] first reads the metadata to
//! learn `current_version`, then posts `{ "versions": [v] }`. The two calls
//! are not atomic: a write landing between them leaves the new version live
//! and soft-deletes the previous one. There is no cross-client lock to take.
//!
//! When the metadata has no usable `current_version` the client deletes the
//! whole metadata entry instead, which destroys every version and its
//! history. This fallback is logged at `warn` and reported as
//! [`DeleteOutcome::MetadataPurged`].

use reqwest::Method;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::error::VaultError;
use crate::transport::Transport;
use crate::types::{
    DeleteOutcome, DeleteResult, Envelope, KeyList, SecretData, SecretEnvelope, SecretMetadata,
};

/// Mount used when none is configured.
pub const DEFAULT_MOUNT: &str = "secret";

/// Client for a single KV v2 mount.
#[derive(Debug, Clone)]
pub struct KvClient {
    transport: Transport,
    mount: String,
}

impl KvClient {
    pub fn new(transport: Transport, mount: impl Into<String>) -> Self {
        let mount: String = mount.into();
        Self {
            transport,
            mount: mount.trim_matches('/').to_owned(),
        }
    }

    pub fn mount(&self) -> &str {
        &self.mount
    }

    fn api_path(&self, segment: &str, path: &str) -> String {
        format!("{}/{segment}/{}", self.mount, encode_path(path))
    }

    fn data_path(&self, path: &str) -> String {
        self.api_path("data", path)
    }

    fn metadata_path(&self, path: &str) -> String {
        self.api_path("metadata", path)
    }

    fn delete_path(&self, path: &str) -> String {
        self.api_path("delete", path)
    }

    /// The secret path inside the mount if `data_path` follows the
    /// `{mount}/data/<path>` layout with a non-empty path.
    fn managed_subpath<'a>(&self, data_path: &'a str) -> Option<&'a str> {
        data_path
            .strip_prefix(self.mount.as_str())
            .and_then(|rest| rest.strip_prefix("/data/"))
            .filter(|rest| !rest.is_empty())
    }

    /// Create or update the secret at `path`. Returns Vault's response
    /// verbatim (it carries the new version), or `Null` when there was none.
    ///
    /// # Errors
    ///
    /// Propagates any [`VaultError`] from the request.
    pub async fn write(&self, path: &str, data: &SecretData) -> Result<Value, VaultError> {
        let body = json!({ "data": data });
        let resp = self
            .transport
            .request(Method::POST, &self.data_path(path), Some(&body))
            .await?;
        Ok(resp.unwrap_or(Value::Null))
    }

    /// Read the latest version of the secret at `path`.
    ///
    /// # Errors
    ///
    /// Propagates any [`VaultError`] from the request.
    pub async fn read(&self, path: &str) -> Result<SecretEnvelope, VaultError> {
        let resp = self
            .transport
            .request(Method::GET, &self.data_path(path), None)
            .await?;
        Ok(SecretEnvelope::new(resp.unwrap_or(Value::Null)))
    }

    /// List keys under `path`. One trailing `/` is ignored, so `app` and
    /// `app/` list the same location. Sub-directories end with `/`.
    ///
    /// # Errors
    ///
    /// Propagates any [`VaultError`], including the 404 Vault returns for a
    /// prefix that holds nothing yet.
    pub async fn list(&self, path: &str) -> Result<Vec<String>, VaultError> {
        let path = path.strip_suffix('/').unwrap_or(path);
        let api_path = format!("{}?list=true", self.metadata_path(path));
        let resp = self.transport.request(Method::GET, &api_path, None).await?;
        Ok(parse_envelope::<KeyList>(resp, &api_path)?
            .map(|list| list.keys)
            .unwrap_or_default())
    }

    /// Read version metadata for the secret at `path`.
    ///
    /// A body that doesn't have the expected shape yields empty metadata
    /// rather than an error.
    ///
    /// # Errors
    ///
    /// Propagates any [`VaultError`] from the request.
    pub async fn read_metadata(&self, path: &str) -> Result<SecretMetadata, VaultError> {
        let api_path = self.metadata_path(path);
        let resp = self.transport.request(Method::GET, &api_path, None).await?;
        let metadata = parse_envelope::<SecretMetadata>(resp, &api_path).unwrap_or_else(|err| {
            debug!(error = %err, "ignoring malformed metadata");
            None
        });
        Ok(metadata.unwrap_or_default())
    }

    /// Soft-delete the current version of the secret at `path`.
    ///
    /// See the module docs for the version lookup, its race, and the
    /// destructive fallback when no version is found.
    ///
    /// # Errors
    ///
    /// Any failed step aborts the sequence and its error is returned.
    pub async fn delete(&self, path: &str) -> Result<DeleteResult, VaultError> {
        let raw_path = format!("{}/data/{path}", self.mount);

        let Some(subpath) = self.managed_subpath(&raw_path) else {
            let data_path = self.data_path(path);
            debug!(path = %data_path, "path outside mount layout, deleting verbatim");
            let resp = self.transport.request(Method::DELETE, &data_path, None).await?;
            return Ok(DeleteResult {
                outcome: DeleteOutcome::RawDeleted,
                response: resp.unwrap_or(Value::Null),
            });
        };

        let metadata = self.read_metadata(subpath).await?;

        if let Some(version) = metadata.usable_version() {
            let body = json!({ "versions": [version] });
            let resp = self
                .transport
                .request(Method::POST, &self.delete_path(subpath), Some(&body))
                .await?;
            return Ok(DeleteResult {
                outcome: DeleteOutcome::SoftDeleted { version },
                response: resp.unwrap_or(Value::Null),
            });
        }

        warn!(
            mount = %self.mount,
            path = subpath,
            "no current_version in metadata; deleting all versions and history"
        );
        let resp = self
            .transport
            .request(Method::DELETE, &self.metadata_path(subpath), None)
            .await?;
        Ok(DeleteResult {
            outcome: DeleteOutcome::MetadataPurged,
            response: resp.unwrap_or(Value::Null),
        })
    }
}

/// Percent-encode each `/`-separated segment of `path`, keeping the separators.
fn encode_path(path: &str) -> String {
    path.split('/')
        .map(urlencoding::encode)
        .collect::<Vec<_>>()
        .join("/")
}

/// Decode the `data` member of an optional response body.
pub(crate) fn parse_envelope<T: serde::de::DeserializeOwned>(
    resp: Option<Value>,
    path: &str,
) -> Result<Option<T>, VaultError> {
    let Some(raw) = resp else {
        return Ok(None);
    };
    let envelope: Envelope<T> =
        serde_json::from_value(raw).map_err(|source| VaultError::Decode {
            path: path.to_owned(),
            source,
        })?;
    Ok(envelope.data)
}
