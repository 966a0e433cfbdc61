//! ACL policy operations (`sys/policies/acl`).

use reqwest::Method;
use serde_json::json;

use crate::error::VaultError;
use crate::kv::parse_envelope;
use crate::transport::Transport;
use crate::types::KeyList;

const ACL_PATH: &str = "sys/policies/acl";

/// Client for named ACL policies.
#[derive(Debug, Clone)]
pub struct PolicyClient {
    transport: Transport,
}

impl PolicyClient {
    pub fn new(transport: Transport) -> Self {
        Self { transport }
    }

    /// Create the policy `name`, or replace its whole document if it exists.
    ///
    /// Replaying the same call leaves Vault in the same state.
    ///
    /// # Errors
    ///
    /// Propagates any [`VaultError`] from the request.
    pub async fn create_or_replace(&self, name: &str, policy: &str) -> Result<(), VaultError> {
        let path = format!("{ACL_PATH}/{}", urlencoding::encode(name));
        let body = json!({ "policy": policy });
        self.transport.request(Method::PUT, &path, Some(&body)).await?;
        Ok(())
    }

    /// Names of all ACL policies, as Vault returns them.
    ///
    /// # Errors
    ///
    /// Propagates any [`VaultError`] from the request.
    pub async fn list_names(&self) -> Result<Vec<String>, VaultError> {
        let resp = self.transport.request(Method::GET, ACL_PATH, None).await?;
        Ok(parse_envelope::<KeyList>(resp, ACL_PATH)?
            .map(|list| list.keys)
            .unwrap_or_default())
    }
}
