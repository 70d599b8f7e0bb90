//! Tool handlers and the tool table.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::mcp::peer::PeerHandle;
use crate::mcp::progress::ProgressReporter;
use crate::mcp::protocol::{methods, Capability, ClientCapabilities, Tool, ToolResult};
use crate::mcp::registry::EntryKind;
use crate::mcp::sampling::{CreateMessageParams, CreateMessageResult, ListRootsResult};
use crate::mcp::session::SessionId;

/// Handler for MCP tool calls.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Get the tool definition.
    fn definition(&self) -> Tool;

    /// Capabilities the controller must have advertised before this tool
    /// may run.
    fn requires(&self) -> Vec<Capability> {
        Vec::new()
    }

    /// Execute the tool with the given arguments.
    async fn execute(&self, ctx: &ToolContext, arguments: HashMap<String, Value>)
        -> Result<ToolResult>;
}

/// What a running tool can see of its session.
#[derive(Clone)]
pub struct ToolContext {
    session_id: SessionId,
    capabilities: ClientCapabilities,
    peer: PeerHandle,
    progress: Option<ProgressReporter>,
    cancelled: Arc<AtomicBool>,
}

impl ToolContext {
    pub fn new(session_id: SessionId, capabilities: ClientCapabilities, peer: PeerHandle) -> Self {
        Self {
            session_id,
            capabilities,
            peer,
            progress: None,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_progress(mut self, progress: Option<ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancellation(mut self, cancelled: Arc<AtomicBool>) -> Self {
        self.cancelled = cancelled;
        self
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn capabilities(&self) -> &ClientCapabilities {
        &self.capabilities
    }

    pub fn supports(&self, capability: &Capability) -> bool {
        self.capabilities.supports(capability)
    }

    fn require(&self, capability: Capability) -> Result<()> {
        if self.supports(&capability) {
            Ok(())
        } else {
            Err(Error::CapabilityUnsupported(capability))
        }
    }

    /// Progress reporter, present when the caller supplied a token.
    pub fn progress(&self) -> Option<&ProgressReporter> {
        self.progress.as_ref()
    }

    /// Whether the controller sent `notifications/cancelled` for this call.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Ask the controller for a completion.
    pub async fn create_message(&self, params: CreateMessageParams) -> Result<CreateMessageResult> {
        self.require(Capability::Sampling)?;
        self.peer
            .request_as(
                methods::SAMPLING_CREATE_MESSAGE,
                Some(serde_json::to_value(params)?),
            )
            .await
    }

    /// Ask the controller for its roots.
    pub async fn list_roots(&self) -> Result<ListRootsResult> {
        self.require(Capability::Roots)?;
        self.peer.request_as(methods::ROOTS_LIST, None).await
    }
}

/// Registered tools, in registration order.
#[derive(Default)]
pub struct ToolTable {
    tools: Vec<Arc<dyn ToolHandler>>,
    index: HashMap<String, usize>,
}

impl ToolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool handler.
    pub fn register<T: ToolHandler + 'static>(&mut self, handler: T) -> Result<()> {
        self.register_arc(Arc::new(handler))
    }

    /// Register a tool handler (Arc version).
    fn register_arc(&mut self, handler: Arc<dyn ToolHandler>) -> Result<()> {
        let name = handler.definition().name;
        if self.index.contains_key(&name) {
            return Err(Error::DuplicateEntry {
                kind: EntryKind::Tool,
                name,
            });
        }
        self.index.insert(name, self.tools.len());
        self.tools.push(handler);
        Ok(())
    }

    /// Get all registered tools.
    pub fn list(&self) -> Vec<Tool> {
        self.tools.iter().map(|h| h.definition()).collect()
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.index.get(name).map(|&i| self.tools[i].clone())
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Helper macro for creating tool input schemas.
#[macro_export]
macro_rules! tool_schema {
    (required: [$($req:expr),* $(,)?], $($json:tt)+) => {
        serde_json::json!({
            "type": "object",
            "properties": {
                $($json)+
            },
            "required": [$($req),*]
        })
    };
    ($($json:tt)*) => {
        serde_json::json!({
            "type": "object",
            "properties": {
                $($json)*
            }
        })
    };
}

/// Helper to create a text content block.
pub fn text_content(text: impl Into<String>) -> crate::mcp::protocol::ContentBlock {
    crate::mcp::protocol::ContentBlock::Text { text: text.into() }
}

/// Helper to create a successful tool result.
pub fn success_result(text: impl Into<String>) -> ToolResult {
    ToolResult {
        content: vec![text_content(text)],
        is_error: false,
        meta: None,
    }
}

/// One text block per line item.
pub fn lines_result<I, S>(items: I) -> ToolResult
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    ToolResult {
        content: items.into_iter().map(text_content).collect(),
        is_error: false,
        meta: None,
    }
}

/// Helper to create an error tool result.
pub fn error_result(text: impl Into<String>) -> ToolResult {
    ToolResult {
        content: vec![text_content(text)],
        is_error: true,
        meta: None,
    }
}

/// Helper to extract a required string argument.
pub fn get_string_arg(args: &HashMap<String, Value>, name: &str) -> Result<String> {
    args.get(name)
        .and_then(|v| v.as_str())
        .map(String::from)
        .ok_or_else(|| Error::InvalidArguments(format!("Missing required argument: {}", name)))
}

/// Helper to extract an optional non-negative integer argument.
pub fn get_optional_u64_arg(args: &HashMap<String, Value>, name: &str) -> Result<Option<u64>> {
    match args.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v.as_u64().map(Some).ok_or_else(|| {
            Error::InvalidArguments(format!("{} must be a non-negative integer", name))
        }),
    }
}
