//! Tools that probe what the controller can do.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

use crate::error::Result;
use crate::mcp::handler::{
    error_result, get_string_arg, lines_result, success_result, ToolContext, ToolHandler,
};
use crate::mcp::protocol::{Capability, Tool, ToolResult};
use crate::mcp::sampling::{CreateMessageParams, SamplingMessage};
use crate::tool_schema;

/// Experimental capability key probed by [`CheckExperimentalToolsTool`].
pub const ADVANCED_TOOLS: &str = "advanced_tools";

const NO_RESPONSE: &str = "No response received.";

pub struct CheckExperimentalToolsTool;

#[async_trait]
impl ToolHandler for CheckExperimentalToolsTool {
    fn definition(&self) -> Tool {
        Tool {
            name: "check_experimental_tools_capability".to_string(),
            description: "Check if the client supports experimental advanced tools.".to_string(),
            input_schema: tool_schema! {},
        }
    }

    async fn execute(&self, ctx: &ToolContext, _args: HashMap<String, Value>) -> Result<ToolResult> {
        let supported = ctx.supports(&Capability::Experimental(ADVANCED_TOOLS.to_string()));
        Ok(success_result(if supported {
            "Supported"
        } else {
            "Not supported"
        }))
    }
}

/// Ask the controller's model for a completion.
pub struct CheckSamplingTool;

#[async_trait]
impl ToolHandler for CheckSamplingTool {
    fn definition(&self) -> Tool {
        Tool {
            name: "check_sampling_capability".to_string(),
            description: "Request an LLM completion from the client.".to_string(),
            input_schema: tool_schema! {
                required: ["prompt"],
                "prompt": {
                    "type": "string",
                    "description": "Text to send to the client's model"
                }
            },
        }
    }

    fn requires(&self) -> Vec<Capability> {
        vec![Capability::Sampling]
    }

    async fn execute(&self, ctx: &ToolContext, args: HashMap<String, Value>) -> Result<ToolResult> {
        let prompt = get_string_arg(&args, "prompt")?;
        let reply = ctx
            .create_message(CreateMessageParams::new(
                vec![SamplingMessage::user_text(prompt)],
                100,
            ))
            .await?;
        Ok(success_result(reply.text().unwrap_or(NO_RESPONSE)))
    }
}

/// List the controller's roots and have it describe the first one.
pub struct CheckRootsTool;

#[async_trait]
impl ToolHandler for CheckRootsTool {
    fn definition(&self) -> Tool {
        Tool {
            name: "check_roots_capability".to_string(),
            description: "Check if the client supports roots (filesystem access).".to_string(),
            input_schema: tool_schema! {},
        }
    }

    fn requires(&self) -> Vec<Capability> {
        vec![Capability::Roots, Capability::Sampling]
    }

    async fn execute(&self, ctx: &ToolContext, _args: HashMap<String, Value>) -> Result<ToolResult> {
        let roots = ctx.list_roots().await?.roots;
        let Some(first) = roots.first() else {
            return Ok(error_result("Error: No roots found."));
        };

        // The root descriptor rides in metadata; no messages, no tokens.
        let reply = ctx
            .create_message(
                CreateMessageParams::new(vec![], 0).with_metadata(serde_json::to_value(first)?),
            )
            .await?;

        let mut lines: Vec<String> = roots.iter().map(|r| r.uri.clone()).collect();
        lines.push(reply.text().unwrap_or(NO_RESPONSE).to_string());
        Ok(lines_result(lines))
    }
}
