//! MCP tool implementations.
//!
//! - `filesystem` - Read-only directory listing and text search (2 tools)
//! - `capabilities` - Controller capability probes (3 tools)

pub mod capabilities;
pub mod filesystem;

use std::path::Path;

use crate::error::Result;
use crate::mcp::registry::Registry;

/// Register all tools with the registry. `max_file_size` caps what
/// `search_files` will read.
pub fn register_all_tools(registry: &mut Registry, root: &Path, max_file_size: u64) -> Result<()> {
    // Filesystem tools (2)
    registry.register_tool(filesystem::ListDirectoryTool::new(root))?;
    registry.register_tool(filesystem::SearchFilesTool::new(root, max_file_size))?;

    // Capability probes (3)
    registry.register_tool(capabilities::CheckExperimentalToolsTool)?;
    registry.register_tool(capabilities::CheckSamplingTool)?;
    registry.register_tool(capabilities::CheckRootsTool)?;

    Ok(())
}
