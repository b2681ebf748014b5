//! Tool dispatcher, tool handlers, and MCP stdio server for the QRWC
//! bridge. `qrwc-core` owns the domain logic (transport, connection,
//! cache, change groups, event buffer, batch execution); this crate wires
//! it to MCP tool calls.

pub mod auth;
pub mod bridge;
pub mod dispatcher;
pub mod handlers;
pub mod params;
pub mod rate_limit;
pub mod server;

pub use bridge::Bridge;
pub use server::BridgeServer;
