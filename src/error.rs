//! Error types for the filesystem explorer MCP server.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use thiserror::Error;

use crate::mcp::protocol::{error_codes, Capability, JsonRpcError};
use crate::mcp::registry::EntryKind;

/// Result type alias for explorer operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Why a resource could not be described or read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum UnreadableReason {
    /// Content exceeds the configured size ceiling.
    TooLarge { size: u64, max: u64 },
    /// Content is not valid UTF-8 text.
    Undecodable,
    /// The content category is not served (directories, denied extensions).
    DisallowedType { detail: String },
    /// The key resolves outside the configured root.
    OutsideRoot,
    /// The underlying read failed.
    Io { detail: String },
}

impl fmt::Display for UnreadableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooLarge { size, max } => {
                write!(f, "content is {} bytes, above the {} byte ceiling", size, max)
            }
            Self::Undecodable => write!(f, "content is not valid UTF-8"),
            Self::DisallowedType { detail } => write!(f, "disallowed content type: {}", detail),
            Self::OutsideRoot => write!(f, "path resolves outside the served root"),
            Self::Io { detail } => write!(f, "read failed: {}", detail),
        }
    }
}

/// Stable error classification that controllers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnsupportedVersion,
    NotReady,
    NotFound,
    CapabilityUnsupported,
    ChunkOutOfRange,
    ResourceUnreadable,
    Timeout,
    MalformedMessage,
    InvalidArguments,
    InvalidRequest,
    MethodNotFound,
    Configuration,
    SessionClosed,
    Internal,
}

impl ErrorKind {
    /// Wire name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnsupportedVersion => "unsupported_version",
            Self::NotReady => "not_ready",
            Self::NotFound => "not_found",
            Self::CapabilityUnsupported => "capability_unsupported",
            Self::ChunkOutOfRange => "chunk_out_of_range",
            Self::ResourceUnreadable => "resource_unreadable",
            Self::Timeout => "timeout",
            Self::MalformedMessage => "malformed_message",
            Self::InvalidArguments => "invalid_arguments",
            Self::InvalidRequest => "invalid_request",
            Self::MethodNotFound => "method_not_found",
            Self::Configuration => "configuration",
            Self::SessionClosed => "session_closed",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for the explorer.
#[derive(Error, Debug)]
pub enum Error {
    // ===== Session Errors =====
    #[error("Unsupported protocol version: {requested} (supported: {supported})")]
    UnsupportedVersion { requested: String, supported: String },

    #[error("Session not ready: {0} received before initialization completed")]
    NotReady(String),

    #[error("Session closed")]
    SessionClosed,

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Timeout: no response to {method} after {seconds} seconds")]
    Timeout { method: String, seconds: u64 },

    // ===== Dispatch Errors =====
    #[error("{kind} not found: {name}")]
    NotFound { kind: EntryKind, name: String },

    #[error("Capability not supported by peer: {0}")]
    CapabilityUnsupported(Capability),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    // ===== Resource Errors =====
    #[error("Chunk index {index} out of range: resource has {total_chunks} chunk(s)")]
    ChunkOutOfRange { index: u64, total_chunks: u64 },

    #[error("Resource unreadable: {uri}: {reason}")]
    ResourceUnreadable { uri: String, reason: UnreadableReason },

    // ===== Configuration Errors =====
    #[error("Duplicate {kind} registration: {name}")]
    DuplicateEntry { kind: EntryKind, name: String },

    #[error("Invalid URI template {template}: {detail}")]
    InvalidTemplate { template: String, detail: String },

    #[error("Configuration error: {0}")]
    Config(String),

    // ===== Peer Errors =====
    #[error("Peer error ({kind}): {message}")]
    Remote {
        kind: ErrorKind,
        code: i32,
        message: String,
        data: Option<Value>,
    },

    #[error("Transport error: {0}")]
    Transport(String),

    // ===== I/O Errors =====
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // ===== Internal Errors =====
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a not-found error for a registry entry.
    pub fn not_found(kind: EntryKind, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Create a resource-unreadable error.
    pub fn unreadable(uri: impl Into<String>, reason: UnreadableReason) -> Self {
        Self::ResourceUnreadable {
            uri: uri.into(),
            reason,
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnsupportedVersion { .. } => ErrorKind::UnsupportedVersion,
            Self::NotReady(_) => ErrorKind::NotReady,
            Self::SessionClosed => ErrorKind::SessionClosed,
            Self::MalformedMessage(_) => ErrorKind::MalformedMessage,
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::MethodNotFound(_) => ErrorKind::MethodNotFound,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::CapabilityUnsupported(_) => ErrorKind::CapabilityUnsupported,
            Self::InvalidArguments(_) => ErrorKind::InvalidArguments,
            Self::ChunkOutOfRange { .. } => ErrorKind::ChunkOutOfRange,
            Self::ResourceUnreadable { .. } => ErrorKind::ResourceUnreadable,
            Self::DuplicateEntry { .. } | Self::InvalidTemplate { .. } | Self::Config(_) => {
                ErrorKind::Configuration
            }
            Self::Remote { kind, .. } => *kind,
            Self::Json(_) => ErrorKind::InvalidArguments,
            Self::Transport(_) | Self::Io(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether this error terminates the session.
    ///
    /// Only codec and negotiation failures are fatal; everything else is
    /// reported per request.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::MalformedMessage | ErrorKind::UnsupportedVersion
        )
    }

    /// JSON-RPC error code for this error.
    pub fn code(&self) -> i32 {
        match self {
            Self::Remote { code, .. } => *code,
            _ => match self.kind() {
                ErrorKind::MalformedMessage => error_codes::PARSE_ERROR,
                ErrorKind::InvalidRequest => error_codes::INVALID_REQUEST,
                ErrorKind::MethodNotFound => error_codes::METHOD_NOT_FOUND,
                ErrorKind::InvalidArguments | ErrorKind::UnsupportedVersion => {
                    error_codes::INVALID_PARAMS
                }
                ErrorKind::NotReady => error_codes::NOT_READY,
                ErrorKind::NotFound => error_codes::NOT_FOUND,
                ErrorKind::CapabilityUnsupported => error_codes::CAPABILITY_UNSUPPORTED,
                ErrorKind::ChunkOutOfRange => error_codes::CHUNK_OUT_OF_RANGE,
                ErrorKind::ResourceUnreadable => error_codes::RESOURCE_UNREADABLE,
                ErrorKind::Timeout => error_codes::TIMEOUT,
                ErrorKind::SessionClosed => error_codes::SESSION_CLOSED,
                ErrorKind::Configuration | ErrorKind::Internal => error_codes::INTERNAL_ERROR,
            },
        }
    }

    /// Structured `data` attached to the JSON-RPC error object.
    fn data(&self) -> Value {
        let mut data = json!({ "kind": self.kind() });
        match self {
            Self::NotFound { kind, name } => {
                data["entry"] = json!(kind);
                data["name"] = json!(name);
            }
            Self::ChunkOutOfRange {
                index,
                total_chunks,
            } => {
                data["index"] = json!(index);
                data["totalChunks"] = json!(total_chunks);
            }
            Self::ResourceUnreadable { uri, reason } => {
                data["uri"] = json!(uri);
                data["detail"] = json!(reason);
            }
            Self::CapabilityUnsupported(capability) => {
                data["capability"] = json!(capability.to_string());
            }
            Self::UnsupportedVersion { supported, .. } => {
                data["supported"] = json!(supported.split(", ").collect::<Vec<_>>());
            }
            Self::Remote {
                data: Some(remote), ..
            } => return remote.clone(),
            _ => {}
        }
        data
    }

    /// Convert into a JSON-RPC error object.
    pub fn to_rpc_error(&self) -> JsonRpcError {
        JsonRpcError {
            code: self.code(),
            message: self.to_string(),
            data: Some(self.data()),
        }
    }

    /// Rebuild an error from a peer's JSON-RPC error object.
    pub fn from_rpc_error(error: JsonRpcError) -> Self {
        let kind = error
            .data
            .as_ref()
            .and_then(|d| d.get("kind"))
            .and_then(|k| serde_json::from_value::<ErrorKind>(k.clone()).ok())
            .unwrap_or(match error.code {
                error_codes::METHOD_NOT_FOUND => ErrorKind::MethodNotFound,
                error_codes::INVALID_PARAMS => ErrorKind::InvalidArguments,
                error_codes::INVALID_REQUEST => ErrorKind::InvalidRequest,
                error_codes::PARSE_ERROR => ErrorKind::MalformedMessage,
                _ => ErrorKind::Internal,
            });
        Self::Remote {
            kind,
            code: error.code,
            message: error.message,
            data: error.data,
        }
    }
}
