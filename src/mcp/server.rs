//! MCP server implementation.
//!
//! One [`McpServer`] serves any number of sessions. Each session runs a
//! reader loop that checks readiness as requests arrive and then hands every
//! request to its own task, so a tool waiting on a sampling reply never
//! stalls the loop that will deliver that reply.

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::mcp::dispatcher::{Dispatcher, Invocation};
use crate::mcp::handler::ToolContext;
use crate::mcp::peer::{PeerHandle, DEFAULT_REQUEST_TIMEOUT};
use crate::mcp::progress::{ProgressParams, ProgressReporter};
use crate::mcp::prompts::{GetPromptParams, ListPromptsResult};
use crate::mcp::protocol::*;
use crate::mcp::registry::Registry;
use crate::mcp::resources::{ListResourceTemplatesResult, ListResourcesResult, ResourceUriParams};
use crate::mcp::session::Session;
use crate::mcp::subscriptions::SubscriptionManager;
use crate::mcp::transport::{Inbound, Message, TcpTransport, Transport};
use crate::metrics::{Metrics, Timer};
use crate::VERSION;

/// Cancellation flags of the requests a session is still working on.
type InFlight = Arc<Mutex<HashMap<RequestId, Arc<AtomicBool>>>>;

/// Per-session handles a request task needs.
#[derive(Clone)]
struct SessionScope {
    session: Arc<Session>,
    peer: PeerHandle,
    outgoing: mpsc::Sender<Message>,
}

/// MCP server.
#[derive(Clone)]
pub struct McpServer {
    dispatcher: Dispatcher,
    subscriptions: Arc<SubscriptionManager>,
    metrics: Arc<Metrics>,
    name: String,
    version: String,
    instructions: Option<String>,
    request_timeout: Duration,
}

impl McpServer {
    /// Create a server over a finished registry.
    pub fn new(registry: impl Into<Arc<Registry>>, name: impl Into<String>) -> Self {
        Self {
            dispatcher: Dispatcher::new(registry.into()),
            subscriptions: Arc::new(SubscriptionManager::new()),
            metrics: Metrics::new(),
            name: name.into(),
            version: VERSION.to_string(),
            instructions: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Share a subscription manager, e.g. with a file watcher.
    pub fn with_subscriptions(mut self, subscriptions: Arc<SubscriptionManager>) -> Self {
        self.subscriptions = subscriptions;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// How long outbound requests (sampling, roots) wait for the controller.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn registry(&self) -> &Arc<Registry> {
        self.dispatcher.registry()
    }

    pub fn subscriptions(&self) -> &Arc<SubscriptionManager> {
        &self.subscriptions
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Accept TCP connections forever, one session per connection.
    pub async fn serve_tcp(&self, listener: TcpListener) -> Result<()> {
        info!("Listening on {}", listener.local_addr()?);
        loop {
            let (stream, addr) = listener.accept().await?;
            info!("Accepted connection from {}", addr);
            let server = self.clone();
            tokio::spawn(async move {
                if let Err(e) = server.run(TcpTransport::tcp(stream)).await {
                    warn!("Session from {} ended with error: {}", addr, e);
                }
            });
        }
    }

    /// Run one session over the given transport until the peer disconnects
    /// or a session-fatal error occurs.
    pub async fn run<T: Transport>(&self, mut transport: T) -> Result<()> {
        let (mut incoming, outgoing) = transport.start().await?;
        let scope = SessionScope {
            session: Arc::new(Session::new()),
            peer: PeerHandle::new(outgoing.clone(), self.request_timeout),
            outgoing,
        };
        let session_id = scope.session.id();
        let in_flight: InFlight = Arc::new(Mutex::new(HashMap::new()));

        self.subscriptions
            .attach(session_id, scope.outgoing.clone())
            .await;
        self.metrics.session_opened();
        info!(
            "Starting MCP session {}: {} v{}",
            session_id, self.name, self.version
        );

        while let Some(inbound) = incoming.recv().await {
            match inbound {
                Inbound::Malformed { id, error } => {
                    warn!("Session {}: {}", session_id, error);
                    self.metrics.inc_failed();
                    self.send(&scope, JsonRpcResponse::failure(id, error.to_rpc_error()))
                        .await;
                    break;
                }
                Inbound::Message(Message::Request(req)) if req.method == methods::INITIALIZE => {
                    self.metrics.inc_requests();
                    if !self.handle_initialize(&scope, req).await {
                        break;
                    }
                }
                Inbound::Message(Message::Request(req)) => {
                    self.metrics.inc_requests();
                    // Readiness is decided now, in arrival order.
                    if let Err(e) = scope.session.check_request(&req.method).await {
                        self.metrics.inc_failed();
                        self.send(
                            &scope,
                            JsonRpcResponse::failure(Some(req.id), e.to_rpc_error()),
                        )
                        .await;
                        continue;
                    }
                    self.spawn_request(&scope, &in_flight, req).await;
                }
                Inbound::Message(Message::Response(resp)) => {
                    scope.peer.complete(resp).await;
                }
                Inbound::Message(Message::Notification(notif)) => {
                    self.handle_notification(&scope, &in_flight, notif).await;
                }
            }
        }

        scope.session.close().await;
        self.subscriptions.detach(session_id).await;
        scope.peer.fail_all().await;
        transport.stop().await?;
        self.metrics.session_closed();
        info!(
            "MCP session {} stopped ({:?})",
            session_id,
            self.metrics.snapshot()
        );
        Ok(())
    }

    async fn send(&self, scope: &SessionScope, response: JsonRpcResponse) {
        if scope.outgoing.send(Message::Response(response)).await.is_err() {
            debug!("Session {} writer gone, dropping response", scope.session.id());
        }
    }

    /// Returns `false` when the handshake failed in a way that ends the session.
    async fn handle_initialize(&self, scope: &SessionScope, req: JsonRpcRequest) -> bool {
        let params: InitializeParams = match parse_params(req.params) {
            Ok(params) => params,
            Err(e) => {
                self.metrics.inc_failed();
                let fatal = scope.session.fail_negotiation(&e).await;
                self.send(scope, JsonRpcResponse::failure(Some(req.id), e.to_rpc_error()))
                    .await;
                return !fatal;
            }
        };

        let capabilities = self.registry().server_capabilities();
        let outcome = scope
            .session
            .begin_negotiation(&capabilities, params)
            .await
            .and_then(|negotiated| {
                let result = negotiated.to_result(
                    Implementation {
                        name: self.name.clone(),
                        version: self.version.clone(),
                    },
                    self.instructions.clone(),
                );
                Ok(serde_json::to_value(result)?)
            });

        match outcome {
            Ok(result) => {
                self.send(scope, JsonRpcResponse::success(req.id, result))
                    .await;
                true
            }
            Err(e) => {
                self.metrics.inc_failed();
                let fatal = e.is_session_fatal();
                self.send(scope, JsonRpcResponse::failure(Some(req.id), e.to_rpc_error()))
                    .await;
                !fatal
            }
        }
    }

    async fn spawn_request(&self, scope: &SessionScope, in_flight: &InFlight, req: JsonRpcRequest) {
        let cancelled = Arc::new(AtomicBool::new(false));
        in_flight
            .lock()
            .await
            .insert(req.id.clone(), cancelled.clone());

        let server = self.clone();
        let scope = scope.clone();
        let in_flight = in_flight.clone();
        tokio::spawn(async move {
            let id = req.id.clone();
            let method = req.method.clone();
            let result = server.handle_request(&scope, cancelled, req).await;
            in_flight.lock().await.remove(&id);

            let response = match result {
                Ok(value) => JsonRpcResponse::success(id, value),
                Err(e) => {
                    server.metrics.inc_failed();
                    debug!("Request {} ({}) failed: {}", method, id, e);
                    JsonRpcResponse::failure(Some(id), e.to_rpc_error())
                }
            };
            server.send(&scope, response).await;
        });
    }

    /// Handle a JSON-RPC request.
    async fn handle_request(
        &self,
        scope: &SessionScope,
        cancelled: Arc<AtomicBool>,
        req: JsonRpcRequest,
    ) -> Result<Value> {
        debug!("Handling request: {} (id: {})", req.method, req.id);
        let registry = self.registry();

        match req.method.as_str() {
            methods::PING => Ok(json!({})),
            methods::TOOLS_LIST => Ok(serde_json::to_value(ListToolsResult {
                tools: registry.tools().list(),
            })?),
            methods::TOOLS_CALL => self.handle_call_tool(scope, cancelled, req.params).await,
            methods::PROMPTS_LIST => Ok(serde_json::to_value(ListPromptsResult {
                prompts: registry.prompts().list(),
            })?),
            methods::PROMPTS_GET => {
                let params: GetPromptParams = parse_params(req.params)?;
                let ctx = self.context(scope, cancelled).await;
                self.dispatcher
                    .invoke(
                        &ctx,
                        Invocation::GetPrompt {
                            name: params.name,
                            arguments: params.arguments,
                        },
                    )
                    .await?
                    .into_value()
            }
            methods::RESOURCES_LIST => Ok(serde_json::to_value(ListResourcesResult {
                resources: registry.resources().list_resources(),
            })?),
            methods::RESOURCE_TEMPLATES_LIST => {
                Ok(serde_json::to_value(ListResourceTemplatesResult {
                    resource_templates: registry.resources().list_templates(),
                })?)
            }
            methods::RESOURCES_READ => {
                let params: ResourceUriParams = parse_params(req.params)?;
                let ctx = self.context(scope, cancelled).await;
                self.dispatcher
                    .invoke(&ctx, Invocation::ReadResource { uri: params.uri })
                    .await?
                    .into_value()
            }
            methods::RESOURCES_SUBSCRIBE => {
                let params: ResourceUriParams = parse_params(req.params)?;
                self.subscriptions
                    .subscribe(scope.session.id(), &params.uri)
                    .await;
                Ok(json!({}))
            }
            methods::RESOURCES_UNSUBSCRIBE => {
                let params: ResourceUriParams = parse_params(req.params)?;
                self.subscriptions
                    .unsubscribe(scope.session.id(), &params.uri)
                    .await;
                Ok(json!({}))
            }
            other => Err(Error::MethodNotFound(other.to_string())),
        }
    }

    async fn context(&self, scope: &SessionScope, cancelled: Arc<AtomicBool>) -> ToolContext {
        ToolContext::new(
            scope.session.id(),
            scope.session.peer_capabilities().await,
            scope.peer.clone(),
        )
        .with_cancellation(cancelled)
    }

    /// Handle call tool request.
    async fn handle_call_tool(
        &self,
        scope: &SessionScope,
        cancelled: Arc<AtomicBool>,
        params: Option<Value>,
    ) -> Result<Value> {
        let params: CallToolParams = parse_params(params)?;
        let progress = params
            .meta
            .and_then(|meta| meta.progress_token)
            .map(|token| ProgressReporter::new(token, scope.outgoing.clone(), None));
        let ctx = self
            .context(scope, cancelled)
            .await
            .with_progress(progress);

        self.metrics.inc_tool_calls();
        let timer = Timer::start();
        let outcome = self
            .dispatcher
            .invoke(
                &ctx,
                Invocation::CallTool {
                    name: params.name.clone(),
                    arguments: params.arguments,
                },
            )
            .await;
        debug!("Tool {} finished in {}ms", params.name, timer.elapsed_ms());
        outcome?.into_value()
    }

    /// Handle a notification.
    async fn handle_notification(
        &self,
        scope: &SessionScope,
        in_flight: &InFlight,
        notif: JsonRpcNotification,
    ) {
        debug!("Handling notification: {}", notif.method);

        match notif.method.as_str() {
            methods::NOTIFY_INITIALIZED => {
                scope.session.acknowledge().await;
            }
            methods::NOTIFY_CANCELLED => match parse_params::<CancelledParams>(notif.params) {
                Ok(cancel) => match in_flight.lock().await.get(&cancel.request_id) {
                    Some(flag) => {
                        info!(
                            "Cancelling request {}: {}",
                            cancel.request_id,
                            cancel.reason.as_deref().unwrap_or("no reason given")
                        );
                        flag.store(true, Ordering::SeqCst);
                    }
                    None => debug!("Cancel for finished request {}", cancel.request_id),
                },
                Err(e) => warn!("Ignoring cancellation: {}", e),
            },
            methods::NOTIFY_PROGRESS => match ProgressParams::from_notification(notif.params) {
                Ok(progress) => debug!(
                    "Controller progress {:?}: {}/{:?}",
                    progress.progress_token, progress.progress, progress.total
                ),
                Err(e) => warn!("Ignoring progress notification: {}", e),
            },
            methods::NOTIFY_ROOTS_LIST_CHANGED => {
                info!("Controller roots changed");
            }
            other => {
                debug!("Unknown notification: {}", other);
            }
        }
    }
}

/// Deserialize request params, mapping failures to `InvalidArguments`.
pub(crate) fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> Result<T> {
    serde_json::from_value(params.unwrap_or(Value::Null)).map_err(|e| {
        debug!("Rejecting params: {}", e);
        Error::InvalidArguments(format!("invalid params: {}", e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::mcp::transport::{LineTransport, MemoryTransport};

    struct Wire {
        incoming: mpsc::Receiver<Inbound>,
        outgoing: mpsc::Sender<Message>,
        next_id: i64,
    }

    impl Wire {
        async fn request(&mut self, method: &str, params: Option<Value>) -> JsonRpcResponse {
            self.next_id += 1;
            let id = RequestId::Number(self.next_id);
            self.outgoing
                .send(Message::Request(JsonRpcRequest::new(id.clone(), method, params)))
                .await
                .unwrap();
            loop {
                match self.incoming.recv().await.unwrap() {
                    Inbound::Message(Message::Response(resp)) if resp.id == Some(id.clone()) => {
                        return resp
                    }
                    _ => continue,
                }
            }
        }

        async fn notify(&self, method: &str) {
            self.outgoing
                .send(Message::Notification(JsonRpcNotification::new(method, None)))
                .await
                .unwrap();
        }
    }

    async fn start() -> (Wire, tokio::task::JoinHandle<Result<()>>) {
        let (server_end, mut client_end) = MemoryTransport::pair();
        let server = McpServer::new(Registry::new(), "test");
        let task = tokio::spawn(async move { server.run(server_end).await });
        let (incoming, outgoing) = client_end.start().await.unwrap();
        (
            Wire {
                incoming,
                outgoing,
                next_id: 0,
            },
            task,
        )
    }

    fn init_params(version: &str) -> Option<Value> {
        Some(json!({
            "protocolVersion": version,
            "capabilities": {},
            "clientInfo": { "name": "wire", "version": "1.0" }
        }))
    }

    fn error_kind(resp: &JsonRpcResponse) -> ErrorKind {
        let data = resp.error.as_ref().unwrap().data.clone().unwrap();
        serde_json::from_value(data["kind"].clone()).unwrap()
    }

    #[tokio::test]
    async fn test_requests_before_initialized_are_not_ready() {
        let (mut wire, _task) = start().await;

        let resp = wire.request(methods::TOOLS_LIST, None).await;
        assert_eq!(error_kind(&resp), ErrorKind::NotReady);

        // Ping is always answered.
        assert!(wire.request(methods::PING, None).await.error.is_none());

        let resp = wire
            .request(methods::INITIALIZE, init_params(LATEST_PROTOCOL_VERSION))
            .await;
        let result: InitializeResult = serde_json::from_value(resp.result.unwrap()).unwrap();
        assert_eq!(result.protocol_version, LATEST_PROTOCOL_VERSION);
        assert_eq!(result.server_info.name, "test");
        assert!(result.capabilities.resources.unwrap().subscribe);

        // Negotiating but not yet acknowledged.
        let resp = wire.request(methods::TOOLS_LIST, None).await;
        assert_eq!(error_kind(&resp), ErrorKind::NotReady);

        wire.notify(methods::NOTIFY_INITIALIZED).await;
        let resp = wire.request(methods::TOOLS_LIST, None).await;
        assert_eq!(resp.result.unwrap()["tools"], json!([]));
    }

    #[tokio::test]
    async fn test_unknown_method_and_second_initialize() {
        let (mut wire, _task) = start().await;
        wire.request(methods::INITIALIZE, init_params(LATEST_PROTOCOL_VERSION))
            .await;
        wire.notify(methods::NOTIFY_INITIALIZED).await;

        let resp = wire.request("completion/complete", None).await;
        assert_eq!(resp.error.as_ref().unwrap().code, error_codes::METHOD_NOT_FOUND);

        let resp = wire
            .request(methods::INITIALIZE, init_params(LATEST_PROTOCOL_VERSION))
            .await;
        assert_eq!(error_kind(&resp), ErrorKind::InvalidRequest);

        // Session survives both errors.
        assert!(wire.request(methods::PING, None).await.error.is_none());
    }

    #[tokio::test]
    async fn test_unsupported_version_closes_session() {
        let (mut wire, task) = start().await;
        let resp = wire
            .request(methods::INITIALIZE, init_params("1999-01-01"))
            .await;
        assert_eq!(error_kind(&resp), ErrorKind::UnsupportedVersion);

        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_malformed_frame_closes_session() {
        use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

        let (server_io, client_io) = tokio::io::duplex(4096);
        let (server_read, server_write) = tokio::io::split(server_io);
        let server = McpServer::new(Registry::new(), "test");
        let task = tokio::spawn(async move {
            server
                .run(LineTransport::new(server_read, server_write))
                .await
        });

        let (client_read, mut client_write) = tokio::io::split(client_io);
        client_write
            .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":7}\n")
            .await
            .unwrap();

        let mut lines = BufReader::new(client_read).lines();
        let line = lines.next_line().await.unwrap().unwrap();
        let resp: JsonRpcResponse = serde_json::from_str(&line).unwrap();
        assert_eq!(resp.id, Some(RequestId::Number(7)));
        assert_eq!(resp.error.unwrap().code, error_codes::PARSE_ERROR);

        task.await.unwrap().unwrap();
        assert!(lines.next_line().await.unwrap().is_none());
    }
}
