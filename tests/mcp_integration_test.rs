//! MCP Server Integration Tests
//!
//! These tests spawn the `fs-explorer` binary and talk JSON-RPC to it over
//! stdio, the way a real controller would.

#![allow(deprecated)] // Allow deprecated cargo_bin for now

use assert_cmd::cargo::CommandCargoExt;
use assert_cmd::Command as AssertCommand;
use predicates::prelude::*;
use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use tempfile::TempDir;

/// MCP Test Client that communicates with the server via stdio
struct McpTestClient {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    request_id: i64,
}

impl McpTestClient {
    /// Spawn a new MCP server rooted at `root` and connect to it
    fn spawn(root: &str, extra_args: &[&str]) -> Result<Self, Box<dyn std::error::Error>> {
        let mut child = Command::cargo_bin("fs-explorer")?
            .arg("--root")
            .arg(root)
            .arg("--transport")
            .arg("stdio")
            .args(extra_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        let stdin = child.stdin.take().ok_or("Failed to get stdin")?;
        let stdout = BufReader::new(child.stdout.take().ok_or("Failed to get stdout")?);

        Ok(Self {
            child,
            stdin,
            stdout,
            request_id: 0,
        })
    }

    fn send(&mut self, message: &Value) -> Result<(), Box<dyn std::error::Error>> {
        writeln!(self.stdin, "{}", serde_json::to_string(message)?)?;
        self.stdin.flush()?;
        Ok(())
    }

    /// Send a JSON-RPC request and get the response
    fn request(
        &mut self,
        method: &str,
        params: Value,
    ) -> Result<Value, Box<dyn std::error::Error>> {
        self.request_id += 1;
        self.send(&json!({
            "jsonrpc": "2.0",
            "id": self.request_id,
            "method": method,
            "params": params
        }))?;

        let mut response_line = String::new();
        self.stdout.read_line(&mut response_line)?;

        let response: Value = serde_json::from_str(&response_line)?;
        Ok(response)
    }

    fn notify(&mut self, method: &str) -> Result<(), Box<dyn std::error::Error>> {
        self.send(&json!({ "jsonrpc": "2.0", "method": method }))
    }

    /// Full handshake: `initialize` then `notifications/initialized`.
    fn initialize(&mut self) -> Result<Value, Box<dyn std::error::Error>> {
        let response = self.request(
            "initialize",
            json!({
                "protocolVersion": "2024-11-05",
                "capabilities": { "roots": { "listChanged": true } },
                "clientInfo": { "name": "test-client", "version": "1.0.0" }
            }),
        )?;
        self.notify("notifications/initialized")?;
        Ok(response)
    }

    fn call_tool(
        &mut self,
        name: &str,
        arguments: Value,
    ) -> Result<Value, Box<dyn std::error::Error>> {
        self.request(
            "tools/call",
            json!({ "name": name, "arguments": arguments }),
        )
    }

    fn read_resource(&mut self, uri: &str) -> Result<Value, Box<dyn std::error::Error>> {
        self.request("resources/read", json!({ "uri": uri }))
    }
}

impl Drop for McpTestClient {
    fn drop(&mut self) {
        let _ = self.child.kill();
    }
}

fn create_test_root() -> TempDir {
    let dir = TempDir::new().expect("Failed to create temp dir");
    std::fs::create_dir(dir.path().join("src")).expect("Failed to create src");
    std::fs::write(
        dir.path().join("src/main.rs"),
        "fn main() { println!(\"Hello\"); }\nfn add(a: i32, b: i32) -> i32 { a + b }\n",
    )
    .expect("Failed to write main.rs");
    std::fs::write(dir.path().join("README.md"), "explorer fixture\n")
        .expect("Failed to write README.md");
    std::fs::write(dir.path().join("tool.exe"), "MZ").expect("Failed to write tool.exe");
    dir
}

fn spawn(root: &TempDir, extra_args: &[&str]) -> McpTestClient {
    McpTestClient::spawn(root.path().to_str().unwrap(), extra_args)
        .expect("Failed to spawn MCP server")
}

// ============================================================================
// Integration Tests
// ============================================================================

#[test]
fn test_binary_help() {
    AssertCommand::cargo_bin("fs-explorer")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Model Context Protocol"))
        .stdout(predicate::str::contains("--chunk-size"));
}

#[test]
fn test_binary_version() {
    AssertCommand::cargo_bin("fs-explorer")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("fs-explorer"));
}

#[test]
fn test_binary_rejects_zero_chunk_size() {
    let root = create_test_root();
    AssertCommand::cargo_bin("fs-explorer")
        .unwrap()
        .arg("--root")
        .arg(root.path())
        .arg("--chunk-size")
        .arg("0")
        .assert()
        .failure();
}

#[test]
fn test_stdio_handshake_until_eof() {
    let root = create_test_root();
    let init = json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "initialize",
        "params": {
            "protocolVersion": "2025-03-26",
            "capabilities": {},
            "clientInfo": { "name": "test-client", "version": "1.0.0" }
        }
    });

    AssertCommand::cargo_bin("fs-explorer")
        .unwrap()
        .arg("--root")
        .arg(root.path())
        .write_stdin(format!("{}\n", init))
        .assert()
        .success()
        .stdout(predicate::str::contains("\"protocolVersion\":\"2025-03-26\""))
        .stdout(predicate::str::contains("fs-explorer"));
}

#[test]
fn test_mcp_initialize() {
    let root = create_test_root();
    let mut client = spawn(&root, &[]);

    let response = client.initialize().expect("Failed to initialize");
    let result = &response["result"];
    assert_eq!(result["protocolVersion"], "2024-11-05");
    assert_eq!(result["serverInfo"]["name"], "fs-explorer");
    assert_eq!(result["capabilities"]["resources"]["subscribe"], true);
    assert!(result["capabilities"].get("tools").is_some());
    assert!(result["capabilities"].get("prompts").is_some());
}

#[test]
fn test_mcp_request_before_initialized_is_refused() {
    let root = create_test_root();
    let mut client = spawn(&root, &[]);

    let response = client
        .request("tools/list", json!({}))
        .expect("Failed to send request");
    assert_eq!(response["error"]["data"]["kind"], "not_ready");
}

#[test]
fn test_mcp_list_directory() {
    let root = create_test_root();
    let mut client = spawn(&root, &[]);

    client.initialize().expect("Failed to initialize");
    let response = client
        .call_tool("list_directory", json!({ "directory_path": "." }))
        .expect("Failed to call list_directory");

    let content = response["result"]["content"]
        .as_array()
        .expect("content should be array");
    let names: Vec<&str> = content.iter().filter_map(|c| c["text"].as_str()).collect();
    assert_eq!(names, vec!["README.md", "src", "tool.exe"]);
}

#[test]
fn test_mcp_search_files() {
    let root = create_test_root();
    let mut client = spawn(&root, &[]);

    client.initialize().expect("Failed to initialize");
    let response = client
        .call_tool(
            "search_files",
            json!({ "root_path": ".", "search_text": "fn add" }),
        )
        .expect("Failed to call search_files");
    assert_eq!(response["result"]["content"][0]["text"], "src/main.rs");
}

#[test]
fn test_mcp_read_chunks() {
    let root = create_test_root();
    let mut client = spawn(&root, &["--chunk-size", "8"]);

    client.initialize().expect("Failed to initialize");
    let response = client
        .read_resource("fs://chunks/README.md")
        .expect("Failed to read manifest");
    let manifest: Value = serde_json::from_str(
        response["result"]["contents"][0]["text"]
            .as_str()
            .expect("manifest text"),
    )
    .expect("manifest JSON");
    assert_eq!(manifest["totalChunks"], 3);

    let response = client
        .read_resource("fs://chunk/README.md/1")
        .expect("Failed to read chunk");
    assert_eq!(response["result"]["contents"][0]["text"], " fixture");

    let response = client
        .read_resource("fs://chunk/README.md/3")
        .expect("Failed to read chunk");
    assert_eq!(response["error"]["data"]["kind"], "chunk_out_of_range");
    assert_eq!(response["error"]["data"]["totalChunks"], 3);
}

#[test]
fn test_mcp_denied_extension() {
    let root = create_test_root();
    let mut client = spawn(&root, &["--denied-extensions", "exe,dll"]);

    client.initialize().expect("Failed to initialize");
    let response = client
        .read_resource("fs://chunks/tool.exe")
        .expect("Failed to read manifest");
    assert_eq!(response["error"]["data"]["kind"], "resource_unreadable");
}

#[test]
fn test_mcp_invalid_tool() {
    let root = create_test_root();
    let mut client = spawn(&root, &[]);

    client.initialize().expect("Failed to initialize");
    let response = client
        .call_tool("nonexistent_tool", json!({}))
        .expect("Failed to call tool");
    assert_eq!(response["error"]["data"]["kind"], "not_found");
}

#[test]
fn test_mcp_sampling_tool_without_capability() {
    let root = create_test_root();
    let mut client = spawn(&root, &[]);

    client.initialize().expect("Failed to initialize");
    let response = client
        .call_tool("check_sampling_capability", json!({ "prompt": "hi" }))
        .expect("Failed to call tool");
    let result = &response["result"];
    assert_eq!(result["isError"], true);
    assert_eq!(result["_meta"]["errorKind"], "capability_unsupported");
}
