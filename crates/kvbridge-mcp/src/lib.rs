//! `kvbridge` MCP server library.
//!
//! Wires the Vault access client from `kvbridge-core` to an MCP stdio server:
//! configuration, logging setup, the operation façade, and the JSON-RPC loop.

pub mod config;
pub mod facade;
pub mod logging;
pub mod mcp;
