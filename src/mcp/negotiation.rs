//! Capability negotiation for the initialize handshake.

use crate::error::{Error, Result};
use crate::mcp::protocol::{
    ClientCapabilities, Implementation, InitializeParams, InitializeResult, ServerCapabilities,
    SUPPORTED_PROTOCOL_VERSIONS,
};

/// Outcome of a successful handshake, fixed for the rest of the session.
#[derive(Debug, Clone, PartialEq)]
pub struct Negotiated {
    pub protocol_version: String,
    pub local_capabilities: ServerCapabilities,
    pub peer_capabilities: ClientCapabilities,
    pub peer_info: Implementation,
}

impl Negotiated {
    /// The initialize result sent back to the controller.
    pub fn to_result(
        &self,
        server_info: Implementation,
        instructions: Option<String>,
    ) -> InitializeResult {
        InitializeResult {
            protocol_version: self.protocol_version.clone(),
            capabilities: self.local_capabilities.clone(),
            server_info,
            instructions,
        }
    }
}

/// Check that `version` is one we speak.
pub fn check_version(version: &str) -> Result<()> {
    if SUPPORTED_PROTOCOL_VERSIONS.contains(&version) {
        Ok(())
    } else {
        Err(Error::UnsupportedVersion {
            requested: version.to_string(),
            supported: SUPPORTED_PROTOCOL_VERSIONS.join(", "),
        })
    }
}

/// Agree on a version and record the controller's capabilities verbatim.
pub fn negotiate(local: &ServerCapabilities, params: InitializeParams) -> Result<Negotiated> {
    check_version(&params.protocol_version)?;

    Ok(Negotiated {
        protocol_version: params.protocol_version,
        local_capabilities: local.clone(),
        peer_capabilities: params.capabilities,
        peer_info: params.client_info,
    })
}
