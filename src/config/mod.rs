//! Configuration management for the explorer.

use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::DEFAULT_CHUNK_SIZE;

/// Default ceiling on the size of a served file (16 MiB).
pub const DEFAULT_MAX_RESOURCE_SIZE: u64 = 16 * 1024 * 1024;

/// Command-line arguments for the explorer server.
#[derive(Parser, Debug, Clone)]
#[command(name = "fs-explorer")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Read-only filesystem explorer speaking the Model Context Protocol")]
pub struct Args {
    /// Directory that resource keys and tool paths resolve against
    #[arg(short, long, env = "FS_EXPLORER_ROOT")]
    pub root: Option<PathBuf>,

    /// Transport mode: stdio or tcp
    #[arg(short, long, default_value = "stdio", env = "FS_EXPLORER_TRANSPORT")]
    pub transport: Transport,

    /// TCP port (only for tcp transport)
    #[arg(short, long, default_value = "8080", env = "FS_EXPLORER_PORT")]
    pub port: u16,

    /// Characters per chunk
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE, env = "FS_EXPLORER_CHUNK_SIZE")]
    pub chunk_size: u64,

    /// Largest file served as a resource (bytes)
    #[arg(long, default_value_t = DEFAULT_MAX_RESOURCE_SIZE, env = "FS_EXPLORER_MAX_RESOURCE_SIZE")]
    pub max_resource_size: u64,

    /// File extensions never served, comma separated
    #[arg(long, value_delimiter = ',', env = "FS_EXPLORER_DENIED_EXTENSIONS")]
    pub denied_extensions: Vec<String>,

    /// Timeout for requests sent to the controller (seconds)
    #[arg(long, default_value = "60", env = "FS_EXPLORER_REQUEST_TIMEOUT")]
    pub request_timeout_secs: u64,

    /// Notify subscribers when served files change
    #[arg(long, env = "FS_EXPLORER_WATCH")]
    pub watch: bool,

    /// Watcher debounce interval (milliseconds)
    #[arg(long, default_value = "500", env = "FS_EXPLORER_DEBOUNCE_MS")]
    pub debounce_ms: u64,

    /// Enable debug logging
    #[arg(short, long, env = "FS_EXPLORER_DEBUG")]
    pub debug: bool,

    /// Log output format
    #[arg(long, default_value = "text", env = "FS_EXPLORER_LOG_FORMAT")]
    pub log_format: LogFormat,
}

/// Transport mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    #[default]
    Stdio,
    Tcp,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Served root directory
    pub root: PathBuf,
    /// Transport mode
    pub transport: Transport,
    /// TCP port
    pub port: u16,
    /// Characters per chunk
    pub chunk_size: u64,
    /// Largest servable file, in bytes
    pub max_resource_size: u64,
    /// Extensions that are never served
    #[serde(default)]
    pub denied_extensions: Vec<String>,
    /// Outbound request timeout
    pub request_timeout_secs: u64,
    /// File watcher enabled
    pub watch: bool,
    /// Watcher debounce
    pub debounce_ms: u64,
    /// Debug mode
    pub debug: bool,
    /// Log format
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Config {
    /// Reject settings the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::Config("chunk_size must be positive".to_string()));
        }
        if self.request_timeout_secs == 0 {
            return Err(Error::Config(
                "request_timeout_secs must be positive".to_string(),
            ));
        }
        if !self.root.is_dir() {
            return Err(Error::Config(format!(
                "root {} is not a directory",
                self.root.display()
            )));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        Self {
            root: args.root.unwrap_or_else(|| PathBuf::from(".")),
            transport: args.transport,
            port: args.port,
            chunk_size: args.chunk_size,
            max_resource_size: args.max_resource_size,
            denied_extensions: args.denied_extensions,
            request_timeout_secs: args.request_timeout_secs,
            watch: args.watch,
            debounce_ms: args.debounce_ms,
            debug: args.debug,
            log_format: args.log_format,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            transport: Transport::Stdio,
            port: 8080,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_resource_size: DEFAULT_MAX_RESOURCE_SIZE,
            denied_extensions: Vec::new(),
            request_timeout_secs: 60,
            watch: false,
            debounce_ms: 500,
            debug: false,
            log_format: LogFormat::Text,
        }
    }
}
