//! Model Context Protocol (MCP) implementation.
//!
//! Both sides of a session live here: `McpServer` exposes a [`Registry`] to
//! controllers, `McpClient` drives a provider and answers its sampling and
//! roots requests.
//!
//! # Architecture
//!
//! - `protocol` - Core MCP types and message definitions
//! - `codec` - Line framing and message classification
//! - `transport` - Transport layer (stdio, TCP, in-memory)
//! - `negotiation` / `session` - Handshake and lifecycle state
//! - `registry` / `dispatcher` - Catalog lookup and uniform invocation
//! - `handler`, `prompts`, `resources` - The three capability kinds
//! - `peer`, `sampling`, `progress` - Outbound requests and notifications
//! - `subscriptions` - Resource-change fan-out
//! - `server` / `client` - Session loops

pub mod client;
pub mod codec;
pub mod dispatcher;
pub mod handler;
pub mod negotiation;
pub mod peer;
pub mod progress;
pub mod prompts;
pub mod protocol;
pub mod registry;
pub mod resources;
pub mod sampling;
pub mod server;
pub mod session;
pub mod subscriptions;
pub mod transport;

pub use client::{ClientHandler, LocalClientHandler, McpClient};
pub use handler::ToolHandler;
pub use protocol::*;
pub use registry::Registry;
pub use server::McpServer;
pub use transport::{StdioTransport, Transport};
