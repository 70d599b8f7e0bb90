//! The explorer's built-in catalog.
//!
//! Everything a stock `fs-explorer` session can discover: the filesystem and
//! capability tools, three prompts, the `fs://sample` resource and the two
//! chunk templates backed by a [`ChunkEngine`].

use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::chunks::ChunkEngine;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::mcp::prompts::{Prompt, PromptArgument, PromptTemplate};
use crate::mcp::registry::Registry;
use crate::mcp::resources::{
    guess_mime_type, Resource, ResourceContents, ResourceReader, ResourceTemplate,
};
use crate::tools;

pub const SAMPLE_URI: &str = "fs://sample";
pub const MANIFEST_TEMPLATE: &str = "fs://chunks/{file_path}";
pub const CHUNK_TEMPLATE: &str = "fs://chunk/{file_path}/{chunk_index}";

const USAGE_INSTRUCTIONS: &str = "\
**Read-Only File System Usage Guide**

**Resources:**
- `fs://chunks/{file_path}` returns chunking info and the chunk URIs of a file
- `fs://chunk/{file_path}/{chunk_index}` returns one chunk of a file

`file_path` is relative to the served root and percent-encoded, so `docs/a.md` is written `docs%2Fa.md`.

**Tools:**
- `list_directory(directory_path)` lists the contents of a directory
- `search_files(root_path, search_text)` finds files containing a string

All operations are read-only. Use chunked reading for large files.";

const EXPLORATION_GUIDE: &str = "\
**Explore Files Step-by-Step**

1. Use `list_directory` on `.` to browse the served root, then descend.
2. Use `search_files` to find files that contain certain content.
3. Read `fs://chunks/{file_path}` to get the chunk count and chunk URIs.
4. Read `fs://chunk/{file_path}/{chunk_index}` to view the file chunk by chunk.

Follow these steps to inspect any file in a large or nested directory structure.";

/// Build the chunk engine described by `config`.
pub fn chunk_engine(config: &Config) -> Result<Arc<ChunkEngine>> {
    let engine = ChunkEngine::new(&config.root, config.chunk_size, config.max_resource_size)?
        .with_denied_extensions(config.denied_extensions.clone());
    Ok(Arc::new(engine))
}

/// Register the full catalog against `engine`.
pub fn build_registry(engine: Arc<ChunkEngine>) -> Result<Registry> {
    let mut registry = Registry::new();

    tools::register_all_tools(&mut registry, engine.root(), engine.max_size())?;
    register_prompts(&mut registry)?;

    registry.register_resource(
        Resource {
            uri: SAMPLE_URI.to_string(),
            name: "Sample Resource".to_string(),
            description: Some("A static example resource".to_string()),
            mime_type: Some("application/json".to_string()),
        },
        SampleReader,
    )?;
    registry.register_template(
        ResourceTemplate {
            uri_template: MANIFEST_TEMPLATE.to_string(),
            name: "File chunks".to_string(),
            description: Some("Chunk count and chunk URIs of a file".to_string()),
            mime_type: Some("application/json".to_string()),
        },
        ManifestReader {
            engine: engine.clone(),
        },
    )?;
    registry.register_template(
        ResourceTemplate {
            uri_template: CHUNK_TEMPLATE.to_string(),
            name: "File chunk".to_string(),
            description: Some("One chunk of a file".to_string()),
            mime_type: Some("text/plain".to_string()),
        },
        ChunkReader { engine },
    )?;

    info!(
        "Catalog ready: {} tools, {} prompts, {} resources",
        registry.tools().len(),
        registry.prompts().len(),
        registry.resources().list_resources().len() + registry.resources().list_templates().len()
    );
    Ok(registry)
}

fn register_prompts(registry: &mut Registry) -> Result<()> {
    registry.register_prompt(
        Prompt {
            name: "result_summary_prompt".to_string(),
            description: Some("Summarize chunking result".to_string()),
            arguments: vec![
                PromptArgument::required("file_path", "File that was chunked"),
                PromptArgument::required("total_chunks", "Number of chunks"),
            ],
        },
        PromptTemplate::user(
            "The file '{{file_path}}' has been split into {{total_chunks}} chunk(s). \
             Use the chunk resources to view each part.",
        ),
    )?;
    registry.register_prompt(
        Prompt {
            name: "usage_instructions".to_string(),
            description: Some("General usage instructions".to_string()),
            arguments: vec![],
        },
        PromptTemplate::user(USAGE_INSTRUCTIONS),
    )?;
    registry.register_prompt(
        Prompt {
            name: "exploration_guide".to_string(),
            description: Some("Step-by-step file navigation guide".to_string()),
            arguments: vec![],
        },
        PromptTemplate::user(EXPLORATION_GUIDE),
    )
}

struct SampleReader;

#[async_trait]
impl ResourceReader for SampleReader {
    async fn read(&self, uri: &str, _params: &HashMap<String, String>) -> Result<ResourceContents> {
        let payload = json!({
            "name": "Sample Resource",
            "description": "This is a static example resource served by fs-explorer.",
            "usage": {
                "info": "You can customize this endpoint to return dynamic content.",
                "example": SAMPLE_URI,
            },
            "data": "Hello from the sample resource!",
        });
        Ok(ResourceContents::text(
            uri,
            "application/json",
            serde_json::to_string_pretty(&payload)?,
        ))
    }
}

fn param<'a>(params: &'a HashMap<String, String>, name: &str) -> Result<&'a str> {
    params
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| Error::InvalidArguments(format!("missing URI parameter: {}", name)))
}

struct ManifestReader {
    engine: Arc<ChunkEngine>,
}

#[async_trait]
impl ResourceReader for ManifestReader {
    async fn read(&self, uri: &str, params: &HashMap<String, String>) -> Result<ResourceContents> {
        let manifest = self.engine.describe(param(params, "file_path")?).await?;
        Ok(ResourceContents::text(
            uri,
            "application/json",
            serde_json::to_string_pretty(&manifest)?,
        ))
    }
}

struct ChunkReader {
    engine: Arc<ChunkEngine>,
}

#[async_trait]
impl ResourceReader for ChunkReader {
    async fn read(&self, uri: &str, params: &HashMap<String, String>) -> Result<ResourceContents> {
        let raw_index = param(params, "chunk_index")?;
        let index: u64 = raw_index.parse().map_err(|_| {
            Error::InvalidArguments(format!("chunk index is not a number: {}", raw_index))
        })?;
        let file_path = param(params, "file_path")?;
        let text = self.engine.read_chunk(file_path, index).await?;
        Ok(ResourceContents::text(
            uri,
            guess_mime_type(Path::new(file_path)),
            text,
        ))
    }
}
