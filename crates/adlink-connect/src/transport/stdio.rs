//! Subprocess transport.
//!
//! JSON-RPC 2.0 over newline-delimited JSON on a child process's standard
//! streams. This is the fallback path when a platform's HTTP microservice is
//! unreachable; one child is spawned per platform and multiplexed behind
//! `StdioMultiClient`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

use crate::error::{ConnectError, Result};
use crate::transport::ToolDescriptor;

const RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);
const PROTOCOL_VERSION: &str = "2024-11-05";

/// How to launch one platform's subprocess server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StdioServerSpec {
    /// Server name; used as the routing key and surfaced in validation
    /// results, so it should carry the platform keyword.
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
}

impl StdioServerSpec {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn working_dir(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest {
    jsonrpc: &'static str,
    id: u64,
    method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[allow(dead_code)]
    jsonrpc: String,
    #[allow(dead_code)]
    id: Option<u64>,
    result: Option<Value>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
    #[allow(dead_code)]
    data: Option<Value>,
}

struct StdioPipes {
    process: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

/// One connected subprocess server.
pub struct StdioClient {
    name: String,
    pipes: Mutex<StdioPipes>,
    request_id: AtomicU64,
}

impl StdioClient {
    /// Spawn the server and perform the initialization handshake.
    pub async fn connect(spec: &StdioServerSpec) -> Result<Self> {
        let mut cmd = Command::new(&spec.command);
        cmd.args(&spec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }
        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }

        let mut process = cmd.spawn().map_err(|e| {
            ConnectError::Transport(format!(
                "Failed to spawn server '{}' (command: {}): {e}",
                spec.name, spec.command
            ))
        })?;

        let stdin = process.stdin.take().ok_or_else(|| {
            ConnectError::Transport(format!("Failed to capture stdin for '{}'", spec.name))
        })?;
        let stdout = process.stdout.take().ok_or_else(|| {
            ConnectError::Transport(format!("Failed to capture stdout for '{}'", spec.name))
        })?;

        let client = Self {
            name: spec.name.clone(),
            pipes: Mutex::new(StdioPipes {
                process,
                stdin,
                stdout: BufReader::new(stdout),
            }),
            request_id: AtomicU64::new(1),
        };

        client.handshake().await?;
        Ok(client)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    async fn handshake(&self) -> Result<()> {
        let init_params = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": "adlink-connect",
                "version": env!("CARGO_PKG_VERSION")
            }
        });

        let response = self.send_request("initialize", Some(init_params)).await?;
        if response.result.is_none() {
            let detail = response
                .error
                .map(|e| format!("code={}, message={}", e.code, e.message))
                .unwrap_or_else(|| "no result in initialize response".to_string());
            return Err(ConnectError::Transport(format!(
                "Server '{}' initialization failed: {detail}",
                self.name
            )));
        }

        // Fire the initialized notification; no response expected
        let notification = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "notifications/initialized",
            "params": {}
        });
        let mut pipes = self.pipes.lock().await;
        let line = serde_json::to_string(&notification)?;
        pipes.stdin.write_all(line.as_bytes()).await?;
        pipes.stdin.write_all(b"\n").await?;
        pipes.stdin.flush().await?;
        Ok(())
    }

    /// List tools exposed by this server.
    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        let response = self.send_request("tools/list", None).await?;
        let result = response.result.ok_or_else(|| {
            let detail = response
                .error
                .map(|e| e.message)
                .unwrap_or_else(|| "no result in tools/list response".to_string());
            ConnectError::Transport(format!("tools/list failed on '{}': {detail}", self.name))
        })?;

        let tools = result
            .get("tools")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        Ok(tools
            .iter()
            .map(|tool| ToolDescriptor {
                name: tool
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                description: tool
                    .get("description")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
            })
            .collect())
    }

    /// Call a tool; a JSON-RPC error becomes `ConnectError::Tool`.
    pub async fn call_tool(&self, tool_name: &str, arguments: Value) -> Result<Value> {
        let params = serde_json::json!({
            "name": tool_name,
            "arguments": arguments,
        });
        let response = self.send_request("tools/call", Some(params)).await?;

        if let Some(error) = response.error {
            return Err(ConnectError::Tool(format!(
                "[{}] {}",
                error.code, error.message
            )));
        }

        Ok(response.result.unwrap_or(Value::Null))
    }

    /// Shut the subprocess down; errors are swallowed by the caller's
    /// cleanup path.
    pub async fn shutdown(&self) -> Result<()> {
        let mut pipes = self.pipes.lock().await;
        let _ = pipes.stdin.shutdown().await;
        let _ = pipes.process.kill().await;
        Ok(())
    }

    async fn send_request(&self, method: &str, params: Option<Value>) -> Result<JsonRpcResponse> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: self.request_id.fetch_add(1, Ordering::SeqCst),
            method: method.to_string(),
            params,
        };
        let line = serde_json::to_string(&request)?;

        let mut pipes = self.pipes.lock().await;
        pipes.stdin.write_all(line.as_bytes()).await?;
        pipes.stdin.write_all(b"\n").await?;
        pipes.stdin.flush().await?;

        Self::read_response(&mut pipes.stdout, &self.name).await
    }

    async fn read_response(
        reader: &mut BufReader<ChildStdout>,
        name: &str,
    ) -> Result<JsonRpcResponse> {
        let mut line = String::new();
        loop {
            line.clear();
            let bytes_read =
                tokio::time::timeout(RESPONSE_TIMEOUT, reader.read_line(&mut line))
                    .await
                    .map_err(|_| {
                        ConnectError::Transport(format!(
                            "Timeout waiting for response from '{name}'"
                        ))
                    })??;

            if bytes_read == 0 {
                return Err(ConnectError::Transport(format!(
                    "Server '{name}' closed stdout (process may have crashed)"
                )));
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            // Skip non-JSON lines such as server log output
            if let Ok(response) = serde_json::from_str::<JsonRpcResponse>(trimmed) {
                return Ok(response);
            }
        }
    }
}

/// All subprocess servers for one run, keyed by server name.
///
/// Connection is all-or-nothing: any spawn or handshake failure tears down
/// whatever already started and fails the whole negotiation.
pub struct StdioMultiClient {
    servers: HashMap<String, StdioClient>,
    order: Vec<String>,
}

impl StdioMultiClient {
    pub async fn connect(specs: &[StdioServerSpec]) -> Result<Self> {
        let mut servers = HashMap::new();
        let mut order = Vec::new();

        for spec in specs {
            match StdioClient::connect(spec).await {
                Ok(client) => {
                    order.push(spec.name.clone());
                    servers.insert(spec.name.clone(), client);
                }
                Err(e) => {
                    // Tear down the children that did start
                    for (_, client) in servers {
                        let _ = client.shutdown().await;
                    }
                    return Err(e);
                }
            }
        }

        Ok(Self { servers, order })
    }

    pub fn server_names(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn get(&self, server: &str) -> Option<&StdioClient> {
        self.servers.get(server)
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    pub async fn shutdown_all(&self) {
        for client in self.servers.values() {
            if let Err(e) = client.shutdown().await {
                tracing::warn!(server = %client.name(), error = %e, "Failed to stop subprocess server");
            }
        }
    }
}
