//! Read-only filesystem tools.
//!
//! Paths are resolved against the served root. Relative paths are joined to
//! it; absolute paths are accepted only when they already lie inside it.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::mcp::handler::{
    error_result, get_optional_u64_arg, get_string_arg, lines_result, success_result,
    ToolContext, ToolHandler,
};
use crate::mcp::protocol::{Tool, ToolResult};
use crate::tool_schema;

/// Resolve `requested` to a directory inside `root`.
async fn resolve_dir(root: &Path, requested: &str) -> Option<PathBuf> {
    let path = tokio::fs::canonicalize(root.join(requested)).await.ok()?;
    if !path.starts_with(root) {
        debug!("Refusing {} outside {}", path.display(), root.display());
        return None;
    }
    tokio::fs::metadata(&path)
        .await
        .ok()
        .filter(|m| m.is_dir())
        .map(|_| path)
}

/// `/`-separated path of `path` relative to `root`.
fn display_key(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// List the entries of a directory.
pub struct ListDirectoryTool {
    root: PathBuf,
}

impl ListDirectoryTool {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ToolHandler for ListDirectoryTool {
    fn definition(&self) -> Tool {
        Tool {
            name: "list_directory".to_string(),
            description: "List the contents of a directory".to_string(),
            input_schema: tool_schema! {
                required: ["directory_path"],
                "directory_path": {
                    "type": "string",
                    "description": "Directory to list, relative to the served root"
                }
            },
        }
    }

    async fn execute(&self, _ctx: &ToolContext, args: HashMap<String, Value>) -> Result<ToolResult> {
        let requested = get_string_arg(&args, "directory_path")?;
        let Some(dir) = resolve_dir(&self.root, &requested).await else {
            return Ok(error_result(format!(
                "Error: '{}' is not a valid directory",
                requested
            )));
        };

        let mut entries = tokio::fs::read_dir(&dir).await?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();

        if names.is_empty() {
            return Ok(success_result(format!("'{}' is empty", requested)));
        }
        Ok(lines_result(names))
    }
}

/// Find files whose text contains a string.
pub struct SearchFilesTool {
    root: PathBuf,
    max_file_size: u64,
}

impl SearchFilesTool {
    /// Files larger than `max_file_size` bytes are not searched.
    pub fn new(root: impl Into<PathBuf>, max_file_size: u64) -> Self {
        Self {
            root: root.into(),
            max_file_size,
        }
    }
}

#[async_trait]
impl ToolHandler for SearchFilesTool {
    fn definition(&self) -> Tool {
        Tool {
            name: "search_files".to_string(),
            description: "Search for files that contain a specific string".to_string(),
            input_schema: tool_schema! {
                required: ["root_path", "search_text"],
                "root_path": {
                    "type": "string",
                    "description": "Directory to search, relative to the served root"
                },
                "search_text": {
                    "type": "string",
                    "description": "Text to look for"
                },
                "max_results": {
                    "type": "integer",
                    "description": "Stop after this many matches"
                }
            },
        }
    }

    async fn execute(&self, ctx: &ToolContext, args: HashMap<String, Value>) -> Result<ToolResult> {
        let root_path = get_string_arg(&args, "root_path")?;
        let search_text = get_string_arg(&args, "search_text")?;
        let max_results = get_optional_u64_arg(&args, "max_results")?.map(|n| n as usize);
        if search_text.is_empty() {
            return Err(Error::InvalidArguments(
                "search_text must not be empty".to_string(),
            ));
        }

        let Some(dir) = resolve_dir(&self.root, &root_path).await else {
            return Ok(error_result(format!(
                "Error: '{}' is not a valid directory",
                root_path
            )));
        };

        let files = tokio::task::spawn_blocking(move || {
            WalkDir::new(&dir)
                .follow_links(false)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .map(|e| e.into_path())
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| Error::Internal(format!("directory walk failed: {}", e)))?;

        let progress = ctx.progress().map(|p| p.with_total(Some(files.len() as f64)));
        let mut matches = Vec::new();

        for (i, file) in files.iter().enumerate() {
            if ctx.is_cancelled() {
                return Ok(error_result("Search cancelled"));
            }
            if max_results.is_some_and(|max| matches.len() >= max) {
                break;
            }
            // Oversized, unreadable and non-UTF-8 files are skipped.
            if self.is_searchable(file).await {
                if let Ok(bytes) = tokio::fs::read(file).await {
                    if let Ok(text) = std::str::from_utf8(&bytes) {
                        if text.contains(&search_text) {
                            matches.push(display_key(&self.root, file));
                        }
                    }
                }
            }
            if let Some(progress) = &progress {
                progress.report((i + 1) as f64, None).await;
            }
        }

        if let Some(progress) = &progress {
            progress.complete(Some("search finished")).await;
        }

        if matches.is_empty() {
            return Ok(success_result(format!(
                "No files contain '{}' in '{}'",
                search_text, root_path
            )));
        }
        matches.sort();
        Ok(lines_result(matches))
    }
}

impl SearchFilesTool {
    async fn is_searchable(&self, file: &Path) -> bool {
        match tokio::fs::metadata(file).await {
            Ok(meta) => meta.len() <= self.max_file_size,
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::codec::Message;
    use crate::mcp::peer::PeerHandle;
    use crate::mcp::progress::{ProgressReporter, ProgressToken};
    use crate::mcp::protocol::{methods, ClientCapabilities};
    use crate::mcp::session::SessionId;
    use serde_json::json;
    use std::fs;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn fixture() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src/nested")).unwrap();
        fs::write(dir.path().join("README.md"), "hello explorer").unwrap();
        fs::write(dir.path().join("src/main.rs"), "fn main() {}").unwrap();
        fs::write(dir.path().join("src/nested/lib.rs"), "pub fn main_helper() {}").unwrap();
        fs::write(dir.path().join("src/blob.bin"), [0xffu8, 0xfe, 0x00]).unwrap();
        let root = dir.path().canonicalize().unwrap();
        (dir, root)
    }

    fn ctx() -> (ToolContext, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(100);
        let peer = PeerHandle::new(tx.clone(), Duration::from_secs(1));
        let progress = ProgressReporter::new(ProgressToken::Number(9), tx, None);
        (
            ToolContext::new(SessionId::new(), ClientCapabilities::default(), peer)
                .with_progress(Some(progress)),
            rx,
        )
    }

    fn args(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_list_directory_sorted() {
        let (_dir, root) = fixture();
        let (ctx, _rx) = ctx();
        let tool = ListDirectoryTool::new(&root);

        let result = tool
            .execute(&ctx, args(&[("directory_path", json!("src"))]))
            .await
            .unwrap();
        assert!(!result.is_error);
        assert_eq!(result.text(), "blob.bin\nmain.rs\nnested");

        let result = tool
            .execute(&ctx, args(&[("directory_path", json!("."))]))
            .await
            .unwrap();
        assert_eq!(result.text(), "README.md\nsrc");
    }

    #[tokio::test]
    async fn test_list_directory_rejects_files_and_escapes() {
        let (_dir, root) = fixture();
        let (ctx, _rx) = ctx();
        let tool = ListDirectoryTool::new(&root);

        for path in ["README.md", "..", "missing"] {
            let result = tool
                .execute(&ctx, args(&[("directory_path", json!(path))]))
                .await
                .unwrap();
            assert!(result.is_error, "{}", path);
            assert_eq!(
                result.text(),
                format!("Error: '{}' is not a valid directory", path)
            );
        }

        let err = tool.execute(&ctx, HashMap::new()).await.unwrap_err();
        assert!(matches!(err, Error::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn test_search_files_matches_and_progress() {
        let (_dir, root) = fixture();
        let (ctx, mut rx) = ctx();
        let tool = SearchFilesTool::new(&root, 1 << 20);

        let result = tool
            .execute(
                &ctx,
                args(&[("root_path", json!(".")), ("search_text", json!("main"))]),
            )
            .await
            .unwrap();
        assert_eq!(result.text(), "src/main.rs\nsrc/nested/lib.rs");

        let mut last = None;
        while let Ok(Message::Notification(n)) = rx.try_recv() {
            assert_eq!(n.method, methods::NOTIFY_PROGRESS);
            last = n.params;
        }
        let last = last.unwrap();
        assert_eq!(last["progress"], last["total"]);
        assert_eq!(last["total"], 4.0);
    }

    #[tokio::test]
    async fn test_search_files_no_match_and_limit() {
        let (_dir, root) = fixture();
        let (ctx, _rx) = ctx();
        let tool = SearchFilesTool::new(&root, 1 << 20);

        let result = tool
            .execute(
                &ctx,
                args(&[("root_path", json!("src")), ("search_text", json!("absent"))]),
            )
            .await
            .unwrap();
        assert!(!result.is_error);
        assert_eq!(result.text(), "No files contain 'absent' in 'src'");

        let result = tool
            .execute(
                &ctx,
                args(&[
                    ("root_path", json!(".")),
                    ("search_text", json!("main")),
                    ("max_results", json!(1)),
                ]),
            )
            .await
            .unwrap();
        assert_eq!(result.content.len(), 1);

        let result = tool
            .execute(
                &ctx,
                args(&[
                    ("root_path", json!(".")),
                    ("search_text", json!("main")),
                    ("max_results", json!(0)),
                ]),
            )
            .await
            .unwrap();
        assert_eq!(result.text(), "No files contain 'main' in '.'");
    }

    #[tokio::test]
    async fn test_search_files_skips_oversized_files() {
        let (_dir, root) = fixture();
        let (ctx, _rx) = ctx();
        // "fn main() {}" is 12 bytes, "pub fn main_helper() {}" is 23.
        let tool = SearchFilesTool::new(&root, 12);

        let result = tool
            .execute(
                &ctx,
                args(&[("root_path", json!(".")), ("search_text", json!("main"))]),
            )
            .await
            .unwrap();
        assert_eq!(result.text(), "src/main.rs");
    }

    #[tokio::test]
    async fn test_search_files_honors_cancellation() {
        let (_dir, root) = fixture();
        let (ctx, _rx) = ctx();
        let flag = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(true));
        let ctx = ctx.with_cancellation(flag);

        let result = SearchFilesTool::new(&root, 1 << 20)
            .execute(
                &ctx,
                args(&[("root_path", json!(".")), ("search_text", json!("main"))]),
            )
            .await
            .unwrap();
        assert!(result.is_error);
        assert_eq!(result.text(), "Search cancelled");
    }
}
