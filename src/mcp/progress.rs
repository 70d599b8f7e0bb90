//! MCP Progress Notifications
//!
//! Support for emitting progress updates during long-running operations.
//! Notifications travel on the session's outbound channel, so they keep send
//! order with every other frame written to that session.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::trace;

use crate::error::{Error, Result};
use crate::mcp::codec::Message;
use crate::mcp::protocol::{methods, JsonRpcNotification};

/// Progress token for tracking operations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum ProgressToken {
    String(String),
    Number(i64),
}

/// Progress notification params.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressParams {
    pub progress_token: ProgressToken,
    pub progress: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ProgressParams {
    /// Check `0 <= progress <= total`.
    pub fn validate(&self) -> Result<()> {
        if !self.progress.is_finite() || self.progress < 0.0 {
            return Err(Error::InvalidArguments(format!(
                "progress must be a non-negative number, got {}",
                self.progress
            )));
        }
        if let Some(total) = self.total {
            if !total.is_finite() || self.progress > total {
                return Err(Error::InvalidArguments(format!(
                    "progress {} exceeds total {}",
                    self.progress, total
                )));
            }
        }
        Ok(())
    }

    /// Parse and validate the params of an incoming progress notification.
    pub fn from_notification(params: Option<Value>) -> Result<Self> {
        let params: Self = serde_json::from_value(params.unwrap_or(Value::Null))
            .map_err(|e| Error::InvalidArguments(format!("invalid progress params: {}", e)))?;
        params.validate()?;
        Ok(params)
    }

    /// Wrap these params in a `notifications/progress` message.
    pub fn into_message(self) -> Result<Message> {
        Ok(Message::Notification(JsonRpcNotification::new(
            methods::NOTIFY_PROGRESS,
            Some(serde_json::to_value(self)?),
        )))
    }
}

/// Progress reporter for emitting updates.
#[derive(Clone)]
pub struct ProgressReporter {
    token: ProgressToken,
    sender: mpsc::Sender<Message>,
    total: Option<f64>,
}

impl ProgressReporter {
    /// Bind a reporter to a token and the session's outbound channel.
    pub fn new(token: ProgressToken, sender: mpsc::Sender<Message>, total: Option<f64>) -> Self {
        Self {
            token,
            sender,
            total,
        }
    }

    /// The token this reporter tags its notifications with.
    pub fn token(&self) -> &ProgressToken {
        &self.token
    }

    /// Same token and channel, different total.
    pub fn with_total(&self, total: Option<f64>) -> Self {
        Self {
            token: self.token.clone(),
            sender: self.sender.clone(),
            total,
        }
    }

    /// Send a progress notification for this reporter.
    ///
    /// Values are clamped into `0..=total`. Send failures are ignored; the
    /// session may already be gone.
    pub async fn report(&self, progress: f64, message: Option<&str>) {
        let mut progress = progress.max(0.0);
        if let Some(total) = self.total {
            progress = progress.min(total);
        }

        let params = ProgressParams {
            progress_token: self.token.clone(),
            progress,
            total: self.total,
            message: message.map(String::from),
        };
        match params.into_message() {
            Ok(msg) => {
                trace!("Progress {:?}: {}", self.token, progress);
                let _ = self.sender.send(msg).await;
            }
            Err(e) => trace!("Dropping progress update: {}", e),
        }
    }

    /// Report completion. Without a total nothing is sent.
    pub async fn complete(&self, message: Option<&str>) {
        if let Some(total) = self.total {
            self.report(total, message).await;
        }
    }
}
