//! fs-explorer: a read-only filesystem explorer speaking the Model Context
//! Protocol (MCP).
//!
//! # Architecture
//!
//! 1. **MCP Layer** (`mcp`) - Session protocol core: codec, negotiation,
//!    registry, dispatcher, subscriptions, bidirectional sampling, and the
//!    provider (`McpServer`) and controller (`McpClient`) session loops
//! 2. **Chunk Layer** (`chunks`) - Deterministic chunk addressing for large files
//! 3. **Tools Layer** (`tools`) - Directory listing, text search, capability probes
//! 4. **Catalog** (`catalog`) - Wires tools, prompts and resources into a registry
//! 5. **Support** - `config`, `watcher`, `metrics`
//!
//! # Features
//!
//! - **Capability negotiation**: version check and capability intersection at handshake
//! - **Chunked resources**: `fs://chunks/{file}` manifests and `fs://chunk/{file}/{i}` slices
//! - **Subscriptions**: per-URI change notifications fed by a file watcher
//! - **Sampling**: tools may ask the controller's model for completions mid-call

pub mod catalog;
pub mod chunks;
pub mod config;
pub mod error;
pub mod mcp;
pub mod metrics;
pub mod tools;
pub mod watcher;

pub use error::{Error, Result};

/// Server version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default chunk size, in characters
pub const DEFAULT_CHUNK_SIZE: u64 = 1024;
