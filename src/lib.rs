//! MCP Gateway — a single JSON-RPC endpoint federating many backend MCP
//! servers.
//!
//! Clients see one logical server whose catalog is the union of the
//! backends'. Backend tools are reached exclusively through three
//! meta-tools (`list_tools`, `describe_tool`, `call_tool`), which keeps
//! the advertised tool surface — and the client's context cost — constant
//! no matter how many backends are federated.

pub mod config;
pub mod gateway;
pub mod server;

pub use config::Config;
pub use gateway::{Gateway, GatewayError};
