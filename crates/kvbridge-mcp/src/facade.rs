//! Operation façade between the MCP protocol layer and the Vault client.
//!
//! The protocol layer hands over an operation name and already-decoded JSON
//! arguments; the façade calls the matching KV or policy operation and turns
//! the outcome into a [`ToolOutput`]. Errors never escape [`Operations::call_tool`]:
//! they come back as error-flagged output so the server keeps serving.

use serde_json::{Map, Value, json};
use tracing::{debug, info};

use kvbridge_core::{DeleteOutcome, KvClient, PolicyClient, SecretData, Transport, VaultError};

/// Tool names exposed over MCP.
pub const CREATE_SECRET: &str = "create_secret";
pub const READ_SECRET: &str = "read_secret";
pub const DELETE_SECRET: &str = "delete_secret";
pub const CREATE_POLICY: &str = "create_policy";

/// Errors raised while running a tool.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error(transparent)]
    Vault(#[from] VaultError),
}

/// Uniform result of a tool call: human-readable text plus the structured
/// value it describes.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub text: String,
    pub structured: Option<Value>,
    pub is_error: bool,
}

impl ToolOutput {
    fn ok(text: String, structured: Value) -> Self {
        Self {
            text,
            structured: Some(structured),
            is_error: false,
        }
    }

    fn error(err: &ToolError) -> Self {
        Self {
            text: format!("Error: {err}"),
            structured: None,
            is_error: true,
        }
    }
}

/// The single entry surface the protocol layer calls.
#[derive(Debug, Clone)]
pub struct Operations {
    kv: KvClient,
    policies: PolicyClient,
}

impl Operations {
    pub fn new(kv: KvClient, policies: PolicyClient) -> Self {
        Self { kv, policies }
    }

    /// Build both clients over one shared transport.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::InvalidConfig`] for an empty token or bad address.
    pub fn connect(addr: &str, token: &str, mount: &str) -> Result<Self, VaultError> {
        let transport = Transport::new(addr, token)?;
        Ok(Self::new(
            KvClient::new(transport.clone(), mount),
            PolicyClient::new(transport),
        ))
    }

    pub fn mount(&self) -> &str {
        self.kv.mount()
    }

    /// Run the tool `name` with `args`, folding any error into the output.
    pub async fn call_tool(&self, name: &str, args: &Value) -> ToolOutput {
        info!(tool = name, "tool call");
        let result = match name {
            CREATE_SECRET => self.tool_create_secret(args).await,
            READ_SECRET => self.tool_read_secret(args).await,
            DELETE_SECRET => self.tool_delete_secret(args).await,
            CREATE_POLICY => self.tool_create_policy(args).await,
            _ => Err(ToolError::UnknownTool(name.to_owned())),
        };
        result.unwrap_or_else(|err| {
            debug!(tool = name, error = %err, "tool failed");
            ToolOutput::error(&err)
        })
    }

    async fn tool_create_secret(&self, args: &Value) -> Result<ToolOutput, ToolError> {
        let path = secret_path_arg(args)?;
        let data = object_arg(args, "data")?;
        self.create_secret(path, &data).await
    }

    async fn tool_read_secret(&self, args: &Value) -> Result<ToolOutput, ToolError> {
        self.read_secret(secret_path_arg(args)?).await
    }

    async fn tool_delete_secret(&self, args: &Value) -> Result<ToolOutput, ToolError> {
        self.delete_secret(secret_path_arg(args)?).await
    }

    async fn tool_create_policy(&self, args: &Value) -> Result<ToolOutput, ToolError> {
        let name = str_arg(args, "name")?;
        let policy = str_arg(args, "policy")?;
        self.create_policy(name, policy).await
    }

    /// Write `data` to `path`; the output carries Vault's raw response.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::Vault`] if the write fails.
    pub async fn create_secret(
        &self,
        path: &str,
        data: &SecretData,
    ) -> Result<ToolOutput, ToolError> {
        let resp = self.kv.write(path, data).await?;
        let text = with_response(
            format!("Secret written to '{path}' in mount '{}'.", self.kv.mount()),
            &resp,
        );
        Ok(ToolOutput::ok(text, resp))
    }

    /// Read `path` and return only its payload (`{}` when Vault sent none).
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::Vault`] if the read fails.
    pub async fn read_secret(&self, path: &str) -> Result<ToolOutput, ToolError> {
        let envelope = self.kv.read(path).await?;
        debug!(path, version = ?envelope.version(), "secret read");
        let payload = Value::Object(envelope.payload());
        Ok(ToolOutput::ok(pretty(&payload), payload))
    }

    /// Soft-delete the current version of `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::Vault`] if any step of the delete fails.
    pub async fn delete_secret(&self, path: &str) -> Result<ToolOutput, ToolError> {
        let result = self.kv.delete(path).await?;
        let summary = match result.outcome {
            DeleteOutcome::SoftDeleted { version } => {
                format!(
                    "Secret '{path}' version {version} soft-deleted; earlier versions are kept."
                )
            }
            DeleteOutcome::MetadataPurged => format!(
                "WARNING: no current version was found for '{path}', so all versions \
                 and metadata were permanently deleted."
            ),
            DeleteOutcome::RawDeleted => format!("Path '{path}' deleted."),
        };
        let text = with_response(summary, &result.response);
        Ok(ToolOutput::ok(text, result.response))
    }

    /// Create or replace the ACL policy `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::Vault`] if Vault rejects the policy.
    pub async fn create_policy(&self, name: &str, policy: &str) -> Result<ToolOutput, ToolError> {
        self.policies.create_or_replace(name, policy).await?;
        Ok(ToolOutput::ok(
            format!("Policy '{name}' created or replaced."),
            json!({ "name": name }),
        ))
    }

    /// Keys at the root of the KV mount. Any failure, including the 404 of a
    /// fresh mount, yields an empty list.
    pub async fn list_secrets(&self) -> Vec<String> {
        match self.kv.list("").await {
            Ok(keys) => keys,
            Err(err) => {
                debug!(error = %err, "secret listing unavailable, returning empty list");
                Vec::new()
            }
        }
    }

    /// Names of all ACL policies.
    ///
    /// # Errors
    ///
    /// Returns the underlying [`VaultError`] unchanged.
    pub async fn list_policies(&self) -> Result<Vec<String>, VaultError> {
        self.policies.list_names().await
    }
}

/// Build a one-path policy skeleton from a comma-separated capability list.
///
/// Each capability is trimmed and empty entries are dropped.
pub fn generate_policy(path: &str, capabilities: &str) -> Value {
    let capabilities: Vec<&str> = capabilities
        .split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .collect();
    let mut paths = Map::new();
    paths.insert(path.to_owned(), json!({ "capabilities": capabilities }));
    json!({ "path": paths })
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// `summary`, followed by the pretty-printed response when there is one.
fn with_response(summary: String, resp: &Value) -> String {
    if resp.is_null() {
        summary
    } else {
        format!("{summary}\n{}", pretty(resp))
    }
}

fn str_arg<'a>(args: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ToolError::InvalidArgument(format!("'{key}' must be a non-empty string")))
}

/// The `path` argument with leading separators removed.
fn secret_path_arg(args: &Value) -> Result<&str, ToolError> {
    let path = str_arg(args, "path")?.trim_start_matches('/');
    if path.is_empty() {
        return Err(ToolError::InvalidArgument(
            "'path' must name a secret inside the mount".to_owned(),
        ));
    }
    Ok(path)
}

fn object_arg(args: &Value, key: &str) -> Result<SecretData, ToolError> {
    args.get(key)
        .and_then(Value::as_object)
        .cloned()
        .ok_or_else(|| ToolError::InvalidArgument(format!("'{key}' must be a JSON object")))
}
