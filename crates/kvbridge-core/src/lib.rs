//! Vault access client for `kvbridge`.
//!
//! Talks to a single KV v2 mount and the ACL policy API of a Vault-compatible
//! server over HTTP. Holds no state beyond the base address, token and mount;
//! every value read from Vault lives only for the call that fetched it.
//!
//! # Example
//!
//! ```rust,no_run
//! use kvbridge_core::{KvClient, Transport};
//!
//! # async fn example() -> Result<(), kvbridge_core::VaultError> {
//! let transport = Transport::new("http://127.0.0.1:8200", "hvs.example")?;
//! let kv = KvClient::new(transport, "secret");
//! let secret = kv.read("app/config").await?;
//! let _payload = secret.payload();
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod kv;
pub mod policy;
pub mod transport;
pub mod types;

pub use error::{RemoteRequestError, VaultError};
pub use kv::{DEFAULT_MOUNT, KvClient};
pub use policy::PolicyClient;
pub use transport::Transport;
pub use types::{DeleteOutcome, DeleteResult, SecretData, SecretEnvelope, SecretMetadata};
