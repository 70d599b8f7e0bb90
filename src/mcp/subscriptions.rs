//! Resource subscriptions.
//!
//! A pure index from URI to subscribed sessions. URIs are compared exactly;
//! subscribing to a URI that does not resolve yet is allowed.

use serde_json::json;
use std::collections::{HashMap, HashSet};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, trace};

use crate::mcp::codec::Message;
use crate::mcp::protocol::{methods, JsonRpcNotification};
use crate::mcp::session::SessionId;

/// Tracks subscribers and fans out `notifications/resources/updated`.
#[derive(Default)]
pub struct SubscriptionManager {
    by_uri: RwLock<HashMap<String, HashSet<SessionId>>>,
    sessions: RwLock<HashMap<SessionId, mpsc::Sender<Message>>>,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a session reachable for notifications.
    pub async fn attach(&self, session: SessionId, outgoing: mpsc::Sender<Message>) {
        self.sessions.write().await.insert(session, outgoing);
    }

    /// Forget a session and every subscription it held.
    pub async fn detach(&self, session: SessionId) {
        self.sessions.write().await.remove(&session);
        let mut by_uri = self.by_uri.write().await;
        by_uri.retain(|_, subscribers| {
            subscribers.remove(&session);
            !subscribers.is_empty()
        });
    }

    pub async fn subscribe(&self, session: SessionId, uri: &str) {
        debug!("Session {} subscribed to {}", session, uri);
        self.by_uri
            .write()
            .await
            .entry(uri.to_string())
            .or_default()
            .insert(session);
    }

    /// Remove a subscription. Unknown subscriptions are ignored.
    pub async fn unsubscribe(&self, session: SessionId, uri: &str) {
        let mut by_uri = self.by_uri.write().await;
        if let Some(subscribers) = by_uri.get_mut(uri) {
            subscribers.remove(&session);
            if subscribers.is_empty() {
                by_uri.remove(uri);
            }
        }
    }

    pub async fn is_subscribed(&self, session: SessionId, uri: &str) -> bool {
        self.by_uri
            .read()
            .await
            .get(uri)
            .is_some_and(|s| s.contains(&session))
    }

    /// Every URI with at least one subscriber.
    pub async fn subscribed_uris(&self) -> Vec<String> {
        let mut uris: Vec<String> = self.by_uri.read().await.keys().cloned().collect();
        uris.sort();
        uris
    }

    /// Notify every session subscribed to exactly `uri`. Returns how many
    /// notifications were queued.
    pub async fn notify(&self, uri: &str) -> usize {
        let subscribers: Vec<SessionId> = match self.by_uri.read().await.get(uri) {
            Some(s) => s.iter().copied().collect(),
            None => return 0,
        };

        let targets: Vec<mpsc::Sender<Message>> = {
            let sessions = self.sessions.read().await;
            subscribers
                .iter()
                .filter_map(|id| sessions.get(id).cloned())
                .collect()
        };

        let mut sent = 0;
        for outgoing in targets {
            let notification = JsonRpcNotification::new(
                methods::NOTIFY_RESOURCE_UPDATED,
                Some(json!({ "uri": uri })),
            );
            if outgoing
                .send(Message::Notification(notification))
                .await
                .is_ok()
            {
                sent += 1;
            }
        }
        trace!("Resource {} updated: notified {} session(s)", uri, sent);
        sent
    }
}
