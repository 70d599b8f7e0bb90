//! Outbound requests to the other side of a session.
//!
//! Every outbound request gets a fresh id and a pending slot. The session's
//! reader loop hands each inbound response to [`PeerHandle::complete`], which
//! wakes whichever caller owns that id. Nesting depth does not matter: a tool
//! handler awaiting a sampling reply holds only its own slot, so the reader
//! keeps running.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::mcp::codec::Message;
use crate::mcp::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId};

/// Default wait for a reply.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

type PendingMap = HashMap<RequestId, oneshot::Sender<JsonRpcResponse>>;

struct PeerInner {
    outgoing: mpsc::Sender<Message>,
    pending: Mutex<PendingMap>,
    next_id: AtomicI64,
    timeout: Duration,
    closed: AtomicBool,
}

/// Cloneable handle for talking to the peer.
#[derive(Clone)]
pub struct PeerHandle {
    inner: Arc<PeerInner>,
}

impl PeerHandle {
    pub fn new(outgoing: mpsc::Sender<Message>, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(PeerInner {
                outgoing,
                pending: Mutex::new(HashMap::new()),
                next_id: AtomicI64::new(1),
                timeout,
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }

    /// Send a request and wait for its response.
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        self.request_with_timeout(method, params, self.inner.timeout)
            .await
    }

    /// Send a request and deserialize the result.
    pub async fn request_as<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<T> {
        let value = self.request(method, params).await?;
        serde_json::from_value(value).map_err(|e| {
            Error::MalformedMessage(format!("unexpected result shape for {}: {}", method, e))
        })
    }

    /// Send a request with an explicit timeout.
    pub async fn request_with_timeout(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(Error::SessionClosed);
        }

        let id = RequestId::Number(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().await.insert(id.clone(), tx);

        debug!("Sending request {} ({})", method, id);
        let request = JsonRpcRequest::new(id.clone(), method, params);
        if self
            .inner
            .outgoing
            .send(Message::Request(request))
            .await
            .is_err()
        {
            self.inner.pending.lock().await.remove(&id);
            return Err(Error::SessionClosed);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => response.into_result(),
            // Sender dropped by fail_all.
            Ok(Err(_)) => Err(Error::SessionClosed),
            Err(_) => {
                self.inner.pending.lock().await.remove(&id);
                warn!("Request {} ({}) timed out", method, id);
                Err(Error::Timeout {
                    method: method.to_string(),
                    seconds: timeout.as_secs(),
                })
            }
        }
    }

    /// Fire-and-forget notification.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        self.inner
            .outgoing
            .send(Message::Notification(JsonRpcNotification::new(
                method, params,
            )))
            .await
            .map_err(|_| Error::SessionClosed)
    }

    /// Route an inbound response to its waiting caller.
    ///
    /// Returns `false` when nobody is waiting: the id is unknown, or the
    /// caller already gave up. Such responses are dropped.
    pub async fn complete(&self, response: JsonRpcResponse) -> bool {
        let Some(id) = response.id.clone() else {
            warn!(
                "Discarding response without id: {:?}",
                response.error.as_ref().map(|e| &e.message)
            );
            return false;
        };

        let sender = self.inner.pending.lock().await.remove(&id);
        match sender {
            Some(tx) => tx.send(response).is_ok(),
            None => {
                warn!("Discarding response for unknown or abandoned request {}", id);
                false
            }
        }
    }

    /// Number of requests still waiting for a reply.
    pub async fn pending_count(&self) -> usize {
        self.inner.pending.lock().await.len()
    }

    /// Fail every waiting caller with `SessionClosed` and refuse new requests.
    pub async fn fail_all(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        let mut pending = self.inner.pending.lock().await;
        if !pending.is_empty() {
            debug!("Failing {} pending request(s)", pending.len());
        }
        pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    async fn next_request(rx: &mut mpsc::Receiver<Message>) -> JsonRpcRequest {
        match rx.recv().await.unwrap() {
            Message::Request(req) => req,
            other => panic!("expected request, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_out_of_order_responses_reach_their_callers() {
        let (tx, mut rx) = mpsc::channel(10);
        let peer = PeerHandle::new(tx, Duration::from_secs(5));

        let first = tokio::spawn({
            let peer = peer.clone();
            async move { peer.request("first", None).await }
        });
        let req_a = next_request(&mut rx).await;
        let second = tokio::spawn({
            let peer = peer.clone();
            async move { peer.request("second", None).await }
        });
        let req_b = next_request(&mut rx).await;

        // Answer the second request first.
        assert!(
            peer.complete(JsonRpcResponse::success(req_b.id, json!({"answer": req_b.method})))
                .await
        );
        assert!(
            peer.complete(JsonRpcResponse::success(req_a.id, json!({"answer": req_a.method})))
                .await
        );

        assert_eq!(first.await.unwrap().unwrap()["answer"], "first");
        assert_eq!(second.await.unwrap().unwrap()["answer"], "second");
        assert_eq!(peer.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_timeout_then_late_response_is_discarded() {
        let (tx, mut rx) = mpsc::channel(10);
        let peer = PeerHandle::new(tx, Duration::from_millis(20));

        let err = peer.request("slow", None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(peer.pending_count().await, 0);

        let req = next_request(&mut rx).await;
        assert!(!peer.complete(JsonRpcResponse::success(req.id, json!({}))).await);
    }

    #[tokio::test]
    async fn test_error_response_keeps_kind() {
        let (tx, mut rx) = mpsc::channel(10);
        let peer = PeerHandle::new(tx, Duration::from_secs(5));

        let call = tokio::spawn({
            let peer = peer.clone();
            async move { peer.request("roots/list", None).await }
        });
        let req = next_request(&mut rx).await;
        peer.complete(JsonRpcResponse::failure(
            Some(req.id),
            Error::NotReady("roots/list".to_string()).to_rpc_error(),
        ))
        .await;

        assert_eq!(call.await.unwrap().unwrap_err().kind(), ErrorKind::NotReady);
    }

    #[tokio::test]
    async fn test_fail_all_wakes_waiters() {
        let (tx, mut rx) = mpsc::channel(10);
        let peer = PeerHandle::new(tx, Duration::from_secs(5));

        let call = tokio::spawn({
            let peer = peer.clone();
            async move { peer.request("ping", None).await }
        });
        next_request(&mut rx).await;
        peer.fail_all().await;

        assert_eq!(
            call.await.unwrap().unwrap_err().kind(),
            ErrorKind::SessionClosed
        );
        assert_eq!(
            peer.request("ping", None).await.unwrap_err().kind(),
            ErrorKind::SessionClosed
        );
    }

    #[tokio::test]
    async fn test_unknown_response_is_dropped() {
        let (tx, _rx) = mpsc::channel(10);
        let peer = PeerHandle::new(tx, Duration::from_secs(5));
        assert!(
            !peer
                .complete(JsonRpcResponse::success(RequestId::Number(99), json!({})))
                .await
        );
    }
}
