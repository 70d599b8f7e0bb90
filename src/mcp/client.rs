//! Controller side of a session.
//!
//! [`McpClient`] drives the handshake and every discovery and invocation call.
//! Requests the provider sends back (sampling, roots, ping) are answered on
//! their own tasks by a [`ClientHandler`], so a provider that samples while a
//! tool call is outstanding gets its answer before the tool call returns.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::mcp::negotiation::check_version;
use crate::mcp::peer::PeerHandle;
use crate::mcp::progress::{ProgressParams, ProgressToken};
use crate::mcp::prompts::{GetPromptResult, ListPromptsResult, Prompt};
use crate::mcp::protocol::*;
use crate::mcp::resources::{
    ListResourceTemplatesResult, ListResourcesResult, ReadResourceResult, Resource,
    ResourceTemplate,
};
use crate::mcp::sampling::{
    CreateMessageParams, CreateMessageResult, ListRootsResult, Root, SamplingRequest,
};
use crate::mcp::server::parse_params;
use crate::mcp::transport::{Inbound, Message, Transport};

/// Answers requests the provider sends to the controller.
#[async_trait]
pub trait ClientHandler: Send + Sync {
    /// Answer `sampling/createMessage`.
    async fn create_message(&self, request: SamplingRequest) -> Result<CreateMessageResult>;

    /// Answer `roots/list`.
    async fn list_roots(&self) -> Result<ListRootsResult>;
}

/// A notification pushed by the provider.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerNotification {
    ResourceUpdated { uri: String },
    Progress(ProgressParams),
    Other { method: String, params: Option<Value> },
}

impl ServerNotification {
    fn from_notification(notif: JsonRpcNotification) -> Self {
        match notif.method.as_str() {
            methods::NOTIFY_RESOURCE_UPDATED => {
                match notif
                    .params
                    .as_ref()
                    .and_then(|p| p.get("uri"))
                    .and_then(Value::as_str)
                {
                    Some(uri) => Self::ResourceUpdated {
                        uri: uri.to_string(),
                    },
                    None => Self::Other {
                        method: notif.method,
                        params: notif.params,
                    },
                }
            }
            methods::NOTIFY_PROGRESS => {
                match ProgressParams::from_notification(notif.params.clone()) {
                    Ok(progress) => Self::Progress(progress),
                    Err(e) => {
                        warn!("Invalid progress notification: {}", e);
                        Self::Other {
                            method: notif.method,
                            params: notif.params,
                        }
                    }
                }
            }
            _ => Self::Other {
                method: notif.method,
                params: notif.params,
            },
        }
    }
}

/// Controller-side session.
pub struct McpClient {
    peer: PeerHandle,
    capabilities: ClientCapabilities,
    initialized: RwLock<Option<InitializeResult>>,
    notifications: Mutex<Option<mpsc::UnboundedReceiver<ServerNotification>>>,
    transport: Mutex<Box<dyn Transport>>,
    reader: JoinHandle<()>,
}

impl McpClient {
    /// Start the transport and the reader loop. No handshake yet.
    pub async fn connect<T: Transport + 'static>(
        mut transport: T,
        handler: Arc<dyn ClientHandler>,
        capabilities: ClientCapabilities,
        timeout: Duration,
    ) -> Result<Self> {
        let (incoming, outgoing) = transport.start().await?;
        let peer = PeerHandle::new(outgoing.clone(), timeout);
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();

        let reader = tokio::spawn(read_loop(
            incoming,
            outgoing,
            peer.clone(),
            handler,
            capabilities.clone(),
            notify_tx,
        ));

        Ok(Self {
            peer,
            capabilities,
            initialized: RwLock::new(None),
            notifications: Mutex::new(Some(notify_rx)),
            transport: Mutex::new(Box::new(transport)),
            reader,
        })
    }

    pub fn capabilities(&self) -> &ClientCapabilities {
        &self.capabilities
    }

    /// Handshake with the latest protocol version.
    pub async fn initialize(&self, client_info: Implementation) -> Result<InitializeResult> {
        self.initialize_with_version(LATEST_PROTOCOL_VERSION, client_info)
            .await
    }

    /// Handshake proposing `version`. On success the `initialized`
    /// notification has already been sent.
    pub async fn initialize_with_version(
        &self,
        version: &str,
        client_info: Implementation,
    ) -> Result<InitializeResult> {
        let params = InitializeParams {
            protocol_version: version.to_string(),
            capabilities: self.capabilities.clone(),
            client_info,
        };
        let result: InitializeResult = self
            .request_as(methods::INITIALIZE, Some(serde_json::to_value(params)?))
            .await?;

        check_version(&result.protocol_version)?;
        info!(
            "Connected to {} {} (protocol {})",
            result.server_info.name, result.server_info.version, result.protocol_version
        );

        self.peer.notify(methods::NOTIFY_INITIALIZED, None).await?;
        *self.initialized.write().await = Some(result.clone());
        Ok(result)
    }

    /// What the provider returned from `initialize`, once it has.
    pub async fn server_info(&self) -> Option<InitializeResult> {
        self.initialized.read().await.clone()
    }

    /// Send any request and return the raw result.
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        self.peer.request(method, params).await
    }

    async fn request_as<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<T> {
        self.peer.request_as(method, params).await
    }

    pub async fn ping(&self) -> Result<()> {
        self.request(methods::PING, None).await.map(|_| ())
    }

    pub async fn list_tools(&self) -> Result<Vec<Tool>> {
        let result: ListToolsResult = self.request_as(methods::TOOLS_LIST, None).await?;
        Ok(result.tools)
    }

    /// Call a tool. `arguments` must be an object (or null for none).
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolResult> {
        self.request_as(
            methods::TOOLS_CALL,
            Some(json!({ "name": name, "arguments": arguments_object(arguments)? })),
        )
        .await
    }

    /// Call a tool, asking for progress notifications tagged with `token`.
    pub async fn call_tool_with_progress(
        &self,
        name: &str,
        arguments: Value,
        token: ProgressToken,
    ) -> Result<ToolResult> {
        self.request_as(
            methods::TOOLS_CALL,
            Some(json!({
                "name": name,
                "arguments": arguments_object(arguments)?,
                "_meta": { "progressToken": token },
            })),
        )
        .await
    }

    pub async fn list_prompts(&self) -> Result<Vec<Prompt>> {
        let result: ListPromptsResult = self.request_as(methods::PROMPTS_LIST, None).await?;
        Ok(result.prompts)
    }

    pub async fn get_prompt(&self, name: &str, arguments: Value) -> Result<GetPromptResult> {
        self.request_as(
            methods::PROMPTS_GET,
            Some(json!({ "name": name, "arguments": arguments_object(arguments)? })),
        )
        .await
    }

    pub async fn list_resources(&self) -> Result<Vec<Resource>> {
        let result: ListResourcesResult = self.request_as(methods::RESOURCES_LIST, None).await?;
        Ok(result.resources)
    }

    pub async fn list_resource_templates(&self) -> Result<Vec<ResourceTemplate>> {
        let result: ListResourceTemplatesResult = self
            .request_as(methods::RESOURCE_TEMPLATES_LIST, None)
            .await?;
        Ok(result.resource_templates)
    }

    pub async fn read_resource(&self, uri: &str) -> Result<ReadResourceResult> {
        self.request_as(methods::RESOURCES_READ, Some(json!({ "uri": uri })))
            .await
    }

    pub async fn subscribe(&self, uri: &str) -> Result<()> {
        self.request(methods::RESOURCES_SUBSCRIBE, Some(json!({ "uri": uri })))
            .await
            .map(|_| ())
    }

    pub async fn unsubscribe(&self, uri: &str) -> Result<()> {
        self.request(methods::RESOURCES_UNSUBSCRIBE, Some(json!({ "uri": uri })))
            .await
            .map(|_| ())
    }

    /// Report progress on something the provider asked for.
    pub async fn send_progress(&self, progress: ProgressParams) -> Result<()> {
        progress.validate()?;
        self.peer
            .notify(methods::NOTIFY_PROGRESS, Some(serde_json::to_value(progress)?))
            .await
    }

    pub async fn notify_roots_changed(&self) -> Result<()> {
        self.peer
            .notify(methods::NOTIFY_ROOTS_LIST_CHANGED, None)
            .await
    }

    /// The notification stream. Only the first call gets it.
    pub async fn take_notifications(&self) -> Option<mpsc::UnboundedReceiver<ServerNotification>> {
        self.notifications.lock().await.take()
    }

    /// End the session. Outstanding requests fail with `SessionClosed`.
    pub async fn close(&self) -> Result<()> {
        self.peer.fail_all().await;
        self.reader.abort();
        self.transport.lock().await.stop().await
    }
}

impl Drop for McpClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

fn arguments_object(arguments: Value) -> Result<Value> {
    match arguments {
        Value::Null => Ok(json!({})),
        Value::Object(_) => Ok(arguments),
        other => Err(Error::InvalidArguments(format!(
            "arguments must be an object, got {}",
            other
        ))),
    }
}

async fn read_loop(
    mut incoming: mpsc::Receiver<Inbound>,
    outgoing: mpsc::Sender<Message>,
    peer: PeerHandle,
    handler: Arc<dyn ClientHandler>,
    capabilities: ClientCapabilities,
    notifications: mpsc::UnboundedSender<ServerNotification>,
) {
    while let Some(inbound) = incoming.recv().await {
        match inbound {
            Inbound::Malformed { id, error } => {
                warn!("Provider sent a malformed frame: {}", error);
                let _ = outgoing
                    .send(Message::Response(JsonRpcResponse::failure(
                        id,
                        error.to_rpc_error(),
                    )))
                    .await;
                break;
            }
            Inbound::Message(Message::Response(resp)) => {
                peer.complete(resp).await;
            }
            Inbound::Message(Message::Request(req)) => {
                let handler = handler.clone();
                let capabilities = capabilities.clone();
                let outgoing = outgoing.clone();
                tokio::spawn(async move {
                    let id = req.id.clone();
                    let method = req.method.clone();
                    let answered =
                        tokio::spawn(
                            async move { answer(handler.as_ref(), &capabilities, req).await },
                        )
                        .await;
                    let response = match answered {
                        Ok(Ok(value)) => JsonRpcResponse::success(id, value),
                        Ok(Err(e)) => {
                            debug!("Answering {} with error: {}", method, e);
                            JsonRpcResponse::failure(Some(id), e.to_rpc_error())
                        }
                        Err(join) => {
                            warn!("Handler for {} aborted: {}", method, join);
                            JsonRpcResponse::failure(
                                Some(id),
                                Error::Internal(format!("{} handler panicked", method))
                                    .to_rpc_error(),
                            )
                        }
                    };
                    let _ = outgoing.send(Message::Response(response)).await;
                });
            }
            Inbound::Message(Message::Notification(notif)) => {
                debug!("Provider notification: {}", notif.method);
                // Nobody listening is fine.
                let _ = notifications.send(ServerNotification::from_notification(notif));
            }
        }
    }

    debug!("Provider connection closed");
    peer.fail_all().await;
}

async fn answer(
    handler: &dyn ClientHandler,
    capabilities: &ClientCapabilities,
    req: JsonRpcRequest,
) -> Result<Value> {
    match req.method.as_str() {
        methods::PING => Ok(json!({})),
        methods::SAMPLING_CREATE_MESSAGE => {
            if !capabilities.supports(&Capability::Sampling) {
                return Err(Error::CapabilityUnsupported(Capability::Sampling));
            }
            let params: CreateMessageParams = parse_params(req.params)?;
            let result = handler
                .create_message(SamplingRequest::classify(params))
                .await?;
            Ok(serde_json::to_value(result)?)
        }
        methods::ROOTS_LIST => {
            if !capabilities.supports(&Capability::Roots) {
                return Err(Error::CapabilityUnsupported(Capability::Roots));
            }
            Ok(serde_json::to_value(handler.list_roots().await?)?)
        }
        other => Err(Error::MethodNotFound(other.to_string())),
    }
}

/// A handler that answers from local state: canned text completions and
/// directory listings of its own roots.
#[derive(Debug, Clone, Default)]
pub struct LocalClientHandler {
    roots: Vec<Root>,
}

impl LocalClientHandler {
    pub fn new(roots: Vec<Root>) -> Self {
        Self { roots }
    }

    /// Expose a directory as a `file://` root.
    pub fn with_directory(mut self, path: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        let path = path.into();
        self.roots.push(Root {
            uri: format!("file://{}", path.display()),
            name: Some(name.into()),
        });
        self
    }

    async fn listing(root: &Root) -> String {
        let path = root.uri.trim_start_matches("file://");
        let mut names = Vec::new();
        match tokio::fs::read_dir(path).await {
            Ok(mut entries) => {
                while let Ok(Some(entry)) = entries.next_entry().await {
                    let mut name = entry.file_name().to_string_lossy().into_owned();
                    if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                        name.push('/');
                    }
                    names.push(name);
                }
            }
            Err(e) => {
                return format!("Directory listing not available for {}: {}", root.uri, e);
            }
        }
        names.sort();
        names
            .iter()
            .map(|n| format!("- {}", n))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[async_trait]
impl ClientHandler for LocalClientHandler {
    async fn create_message(&self, request: SamplingRequest) -> Result<CreateMessageResult> {
        Ok(match request {
            SamplingRequest::Root { root, .. } => CreateMessageResult {
                role: Role::User,
                content: ContentBlock::Text {
                    text: Self::listing(&root).await,
                },
                model: "root-reader".to_string(),
                stop_reason: None,
            },
            SamplingRequest::Text(params) => {
                let message = params
                    .messages
                    .first()
                    .and_then(|m| match &m.content {
                        ContentBlock::Text { text } => Some(text.as_str()),
                        _ => None,
                    })
                    .unwrap_or_default();
                CreateMessageResult {
                    role: Role::Assistant,
                    content: ContentBlock::Text {
                        text: format!("In: {} Out: Hello, world! from model", message),
                    },
                    model: "gpt-3.5-turbo".to_string(),
                    stop_reason: Some("endTurn".to_string()),
                }
            }
        })
    }

    async fn list_roots(&self) -> Result<ListRootsResult> {
        Ok(ListRootsResult {
            roots: self.roots.clone(),
        })
    }
}
