//! Uniform invocation across tools, prompts and resources.
//!
//! Tool failures become `isError` content; prompt and resource failures are
//! returned as errors and reach the controller as JSON-RPC errors. Handlers
//! run on their own task so a panic is reported instead of unwinding into
//! the session.

use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error};

use crate::error::{Error, Result, UnreadableReason};
use crate::mcp::handler::ToolContext;
use crate::mcp::prompts::GetPromptResult;
use crate::mcp::protocol::ToolResult;
use crate::mcp::registry::{Entry, EntryKind, Registry};
use crate::mcp::resources::ReadResourceResult;

/// One invocation of a registered entry.
#[derive(Debug, Clone)]
pub enum Invocation {
    CallTool {
        name: String,
        arguments: HashMap<String, Value>,
    },
    GetPrompt {
        name: String,
        arguments: HashMap<String, Value>,
    },
    ReadResource {
        uri: String,
    },
}

impl Invocation {
    pub fn kind(&self) -> EntryKind {
        match self {
            Self::CallTool { .. } => EntryKind::Tool,
            Self::GetPrompt { .. } => EntryKind::Prompt,
            Self::ReadResource { .. } => EntryKind::Resource,
        }
    }

    /// Name or URI being invoked.
    pub fn key(&self) -> &str {
        match self {
            Self::CallTool { name, .. } | Self::GetPrompt { name, .. } => name,
            Self::ReadResource { uri } => uri,
        }
    }
}

/// Result of a successful invocation.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Outcome {
    Tool(ToolResult),
    Prompt(GetPromptResult),
    Resource(ReadResourceResult),
}

impl Outcome {
    pub fn into_value(self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Routes invocations to registry entries.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<Registry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub async fn invoke(&self, ctx: &ToolContext, invocation: Invocation) -> Result<Outcome> {
        debug!(
            "Dispatching {} {}",
            invocation.kind(),
            invocation.key()
        );
        match invocation {
            Invocation::CallTool { name, arguments } => self
                .call_tool(ctx, &name, arguments)
                .await
                .map(Outcome::Tool),
            Invocation::GetPrompt { name, arguments } => self
                .registry
                .prompts()
                .get(&name, &arguments)
                .map(Outcome::Prompt),
            Invocation::ReadResource { uri } => {
                self.read_resource(&uri).await.map(Outcome::Resource)
            }
        }
    }

    async fn call_tool(
        &self,
        ctx: &ToolContext,
        name: &str,
        arguments: HashMap<String, Value>,
    ) -> Result<ToolResult> {
        let Entry::Tool(handler) = self.registry.get(EntryKind::Tool, name)? else {
            return Err(Error::not_found(EntryKind::Tool, name));
        };

        // Prerequisites are checked before the handler sees anything.
        if let Some(missing) = handler
            .requires()
            .into_iter()
            .find(|cap| !ctx.supports(cap))
        {
            debug!("Tool {} refused: peer lacks {}", name, missing);
            return Ok(ToolResult::from_error(&Error::CapabilityUnsupported(
                missing,
            )));
        }

        let task_ctx = ctx.clone();
        let outcome =
            tokio::spawn(async move { handler.execute(&task_ctx, arguments).await }).await;

        Ok(match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                debug!("Tool {} failed: {}", name, e);
                ToolResult::from_error(&e)
            }
            Err(join) => {
                error!("Tool {} handler aborted: {}", name, join);
                ToolResult::from_error(&Error::Internal(format!(
                    "tool {} handler panicked",
                    name
                )))
            }
        })
    }

    async fn read_resource(&self, uri: &str) -> Result<ReadResourceResult> {
        let Entry::Resource(resolved) = self.registry.get(EntryKind::Resource, uri)? else {
            return Err(Error::not_found(EntryKind::Resource, uri));
        };

        match tokio::spawn(async move { resolved.read().await }).await {
            Ok(contents) => Ok(ReadResourceResult {
                contents: vec![contents?],
            }),
            Err(join) => {
                error!("Resource reader for {} aborted: {}", uri, join);
                Err(Error::unreadable(
                    uri,
                    UnreadableReason::Io {
                        detail: "resource reader panicked".to_string(),
                    },
                ))
            }
        }
    }
}
