//! Command-line and environment configuration.
//!
//! Every flag has an environment fallback so the server can be launched by
//! an MCP host that only sets env vars.

use anyhow::{Result, bail};
use clap::Parser;
use tracing::warn;

/// Token prefixes Vault issues (service, batch, recovery; legacy and current).
const KNOWN_TOKEN_PREFIXES: &[&str] = &["hvs.", "hvb.", "hvr.", "s.", "b.", "r."];

/// kvbridge: Vault KV secrets and ACL policies over MCP.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "kvbridge",
    version,
    about = "kvbridge: MCP server exposing Vault KV v2 secrets and ACL policies",
    long_about = None,
    after_help = "Environment variables:\n  \
                  VAULT_ADDR          Vault address (default: http://127.0.0.1:8200)\n  \
                  VAULT_TOKEN         Authentication token (required)\n  \
                  VAULT_KV_MOUNT      KV v2 mount name (default: secret)\n  \
                  KVBRIDGE_LOG_LEVEL  Log filter (default: info, RUST_LOG wins)\n\n\
                  The server speaks JSON-RPC on stdin/stdout; logs go to stderr."
)]
pub struct Config {
    /// Vault server address.
    #[arg(long, env = "VAULT_ADDR", default_value = "http://127.0.0.1:8200")]
    pub addr: String,

    /// Authentication token.
    #[arg(long, env = "VAULT_TOKEN", hide_env_values = true)]
    pub token: String,

    /// Name of the KV v2 mount holding secrets.
    #[arg(long, env = "VAULT_KV_MOUNT", default_value = kvbridge_core::DEFAULT_MOUNT)]
    pub mount: String,

    /// Log filter (e.g. `info`, `debug`, `kvbridge_core=trace`).
    #[arg(long, env = "KVBRIDGE_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long, env = "KVBRIDGE_LOG_JSON", default_value = "false")]
    pub log_json: bool,
}

impl Config {
    /// Check address, token and mount before any client is built.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        let url = match reqwest::Url::parse(&self.addr) {
            Ok(url) => url,
            Err(e) => bail!("VAULT_ADDR '{}' is not a valid URL: {e}", self.addr),
        };
        if !matches!(url.scheme(), "http" | "https") {
            bail!(
                "VAULT_ADDR must use http:// or https://, got '{}'",
                url.scheme()
            );
        }
        if url.host_str().is_none_or(str::is_empty) {
            bail!("VAULT_ADDR '{}' has no host", self.addr);
        }

        if self.token.trim().is_empty() {
            bail!("VAULT_TOKEN must not be empty");
        }
        if !KNOWN_TOKEN_PREFIXES
            .iter()
            .any(|prefix| self.token.starts_with(prefix))
        {
            warn!(
                "VAULT_TOKEN has no recognised Vault prefix (hvs., hvb., s., ...); using it as-is"
            );
        }

        let mount = self.mount.trim_matches('/');
        if mount.is_empty() || mount.contains('/') {
            bail!("VAULT_KV_MOUNT must be a single path segment, got '{}'", self.mount);
        }

        Ok(())
    }
}
