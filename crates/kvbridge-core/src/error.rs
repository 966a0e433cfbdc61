//! Error types for `kvbridge-core`.
//!
//! Every remote failure carries the method, relative API path and status so
//! the message is useful without a debugger. Tokens and secret payloads never
//! appear in error text.

use reqwest::{Method, StatusCode};

/// A non-success HTTP outcome from the Vault API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error(
    "{method} {path} failed with {}{}",
    .status.as_u16(),
    messages_suffix(.messages.as_deref())
)]
pub struct RemoteRequestError {
    /// HTTP method of the failed request.
    pub method: Method,
    /// Path relative to the `/v1/` API prefix.
    pub path: String,
    /// Status code returned by the server.
    pub status: StatusCode,
    /// Messages from the `errors` array, joined with `; `.
    pub messages: Option<String>,
}

fn messages_suffix(messages: Option<&str>) -> String {
    messages.map(|m| format!(": {m}")).unwrap_or_default()
}

/// All errors the Vault access client can produce.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    /// The server answered with a non-2xx status.
    #[error(transparent)]
    Remote(#[from] RemoteRequestError),

    /// Connection, DNS, TLS or timeout failure before a status was received.
    #[error("vault request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// A success response carried a body that is not valid JSON.
    #[error("invalid JSON from vault at {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    /// The client could not be constructed from the given address/token.
    #[error("invalid vault client config: {0}")]
    InvalidConfig(String),
}

impl VaultError {
    /// HTTP status of a remote failure, if this error came from one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Remote(err) => Some(err.status),
            _ => None,
        }
    }
}
