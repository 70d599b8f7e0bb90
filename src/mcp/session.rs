//! Session lifecycle.
//!
//! `Connecting -> Negotiating -> Ready -> Closed`. `Closed` is terminal.
//! Readiness is checked when a request arrives, in arrival order, so a
//! request read before the `initialized` acknowledgment is refused even if
//! the acknowledgment follows immediately.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::mcp::negotiation::{self, Negotiated};
use crate::mcp::protocol::{methods, ClientCapabilities, InitializeParams, ServerCapabilities};

/// Unique id of one connected peer pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Connecting,
    Negotiating,
    Ready,
    Closed,
}

/// Provider-side view of one session.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    state: RwLock<SessionState>,
    negotiated: RwLock<Option<Negotiated>>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: SessionId::new(),
            state: RwLock::new(SessionState::Connecting),
            negotiated: RwLock::new(None),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub async fn state(&self) -> SessionState {
        *self.state.read().await
    }

    pub async fn is_closed(&self) -> bool {
        self.state().await == SessionState::Closed
    }

    /// Handle an `initialize` request.
    ///
    /// A version mismatch closes the session. A second `initialize` is an
    /// ordinary per-request error.
    pub async fn begin_negotiation(
        &self,
        local: &ServerCapabilities,
        params: InitializeParams,
    ) -> Result<Negotiated> {
        let mut state = self.state.write().await;
        match *state {
            SessionState::Connecting => {}
            SessionState::Closed => return Err(Error::SessionClosed),
            SessionState::Negotiating | SessionState::Ready => {
                return Err(Error::InvalidRequest(
                    "initialize may only be sent once per session".to_string(),
                ))
            }
        }

        match negotiation::negotiate(local, params) {
            Ok(negotiated) => {
                info!(
                    "Session {} negotiating protocol {} with {} {}",
                    self.id,
                    negotiated.protocol_version,
                    negotiated.peer_info.name,
                    negotiated.peer_info.version
                );
                *self.negotiated.write().await = Some(negotiated.clone());
                *state = SessionState::Negotiating;
                Ok(negotiated)
            }
            Err(e) => {
                warn!("Session {} negotiation failed: {}", self.id, e);
                *state = SessionState::Closed;
                Err(e)
            }
        }
    }

    /// Handle the `initialized` notification. Returns whether the session
    /// became ready.
    pub async fn acknowledge(&self) -> bool {
        let mut state = self.state.write().await;
        if *state == SessionState::Negotiating {
            *state = SessionState::Ready;
            info!("Session {} ready", self.id);
            true
        } else {
            warn!(
                "Session {} ignoring initialized notification in state {:?}",
                self.id, *state
            );
            false
        }
    }

    /// Whether a request for `method` may be serviced right now.
    pub async fn check_request(&self, method: &str) -> Result<()> {
        match self.state().await {
            SessionState::Closed => Err(Error::SessionClosed),
            SessionState::Ready => Ok(()),
            _ if method == methods::PING => Ok(()),
            state => {
                debug!("Refusing {} in state {:?}", method, state);
                Err(Error::NotReady(method.to_string()))
            }
        }
    }

    /// Capabilities the controller advertised; empty before negotiation.
    pub async fn peer_capabilities(&self) -> ClientCapabilities {
        self.negotiated
            .read()
            .await
            .as_ref()
            .map(|n| n.peer_capabilities.clone())
            .unwrap_or_default()
    }

    /// An `initialize` whose params could not be read. Closes the session if
    /// it has not negotiated yet; returns whether it did.
    pub async fn fail_negotiation(&self, reason: &Error) -> bool {
        let mut state = self.state.write().await;
        if *state != SessionState::Connecting {
            return false;
        }
        warn!("Session {} negotiation failed: {}", self.id, reason);
        *state = SessionState::Closed;
        true
    }

    pub async fn close(&self) {
        let mut state = self.state.write().await;
        if *state != SessionState::Closed {
            debug!("Session {} closed", self.id);
            *state = SessionState::Closed;
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
