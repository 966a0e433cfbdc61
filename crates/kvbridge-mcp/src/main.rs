//! `kvbridge` entry point.
//!
//! Parses configuration, validates it before any client is built, starts
//! logging on stderr, and serves MCP over stdio until stdin closes.

use anyhow::Context;
use clap::Parser;

use kvbridge_mcp::config::Config;
use kvbridge_mcp::facade::Operations;
use kvbridge_mcp::{logging, mcp};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    logging::init(&config.log_level, config.log_json);

    config.validate().context("invalid configuration")?;

    let ops = Operations::connect(&config.addr, &config.token, &config.mount)
        .context("failed to build vault client")?;

    mcp::run_mcp_server(ops).await
}
