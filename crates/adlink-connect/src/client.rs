//! Transport-agnostic client facade.
//!
//! The agent layer sees one client regardless of whether platforms are
//! reached over HTTP sessions or a subprocess multi-client. Tool invocation
//! collapses the upstream response shapes (JSON, plain text, content-block
//! lists) into a single string.

use serde_json::Value;

use adlink_models::Platform;

use crate::error::{ConnectError, Result};
use crate::transport::{NegotiatedTransport, ToolDescriptor, TransportMode};

/// A callable tool, addressable through whichever transport produced it.
#[derive(Debug, Clone)]
pub struct ToolHandle {
    /// Transport/server identifier the tool lives on.
    pub server: String,
    /// Platform the server resolved to, when determinable.
    pub platform: Option<Platform>,
    pub name: String,
    pub description: String,
}

/// Uniform facade over the negotiated transport.
pub struct UnifiedClient {
    transport: NegotiatedTransport,
}

impl UnifiedClient {
    pub fn new(transport: NegotiatedTransport) -> Self {
        Self { transport }
    }

    pub fn mode(&self) -> TransportMode {
        self.transport.mode()
    }

    /// Server identifiers this client can route to.
    pub fn server_names(&self) -> Vec<String> {
        match &self.transport {
            NegotiatedTransport::Http(clients) => {
                let mut names: Vec<String> =
                    clients.values().map(|c| c.server().to_string()).collect();
                names.sort();
                names
            }
            NegotiatedTransport::Stdio(multi) => multi.server_names(),
        }
    }

    /// List the tools of a single server.
    pub async fn list_tools_for(&self, server: &str) -> Result<Vec<ToolDescriptor>> {
        match &self.transport {
            NegotiatedTransport::Http(clients) => {
                let client = clients
                    .values()
                    .find(|c| c.server() == server)
                    .ok_or_else(|| ConnectError::Transport(format!("unknown server: {server}")))?;
                client.list_tools().await
            }
            NegotiatedTransport::Stdio(multi) => {
                let client = multi
                    .get(server)
                    .ok_or_else(|| ConnectError::Transport(format!("unknown server: {server}")))?;
                client.list_tools().await
            }
        }
    }

    /// List every tool across every server, wrapped in routable handles.
    pub async fn list_tools(&self) -> Result<Vec<ToolHandle>> {
        let mut handles = Vec::new();
        for server in self.server_names() {
            let tools = self.list_tools_for(&server).await?;
            let platform = Platform::resolve(&server);
            handles.extend(tools.into_iter().map(|tool| ToolHandle {
                server: server.clone(),
                platform,
                name: tool.name,
                description: tool.description,
            }));
        }
        Ok(handles)
    }

    /// Invoke a tool on a specific server, collapsing the response to text.
    pub async fn call_tool_on(
        &self,
        server: &str,
        tool_name: &str,
        arguments: Value,
    ) -> Result<String> {
        let raw = match &self.transport {
            NegotiatedTransport::Http(clients) => {
                let client = clients
                    .values()
                    .find(|c| c.server() == server)
                    .ok_or_else(|| ConnectError::Transport(format!("unknown server: {server}")))?;
                client.call_tool(tool_name, arguments).await?
            }
            NegotiatedTransport::Stdio(multi) => {
                let client = multi
                    .get(server)
                    .ok_or_else(|| ConnectError::Transport(format!("unknown server: {server}")))?;
                client.call_tool(tool_name, arguments).await?
            }
        };
        Ok(collapse_content(&raw))
    }

    /// Invoke a tool through its handle.
    pub async fn call(&self, handle: &ToolHandle, arguments: Value) -> Result<String> {
        self.call_tool_on(&handle.server, &handle.name, arguments)
            .await
    }

    /// Release every underlying session/process. Always safe to call;
    /// individual cleanup errors are logged and swallowed.
    pub async fn close(&self) {
        match &self.transport {
            NegotiatedTransport::Http(clients) => {
                for client in clients.values() {
                    client.close().await;
                }
            }
            NegotiatedTransport::Stdio(multi) => multi.shutdown_all().await,
        }
    }
}

/// Collapse the three upstream response shapes to one string:
/// plain text stays as-is, content-block lists are joined on newlines, and
/// anything else is compact JSON.
pub(crate) fn collapse_content(value: &Value) -> String {
    if let Some(text) = value.as_str() {
        return text.to_string();
    }

    // {content: [...]} wrapper or a bare block list
    let blocks = value
        .get("content")
        .and_then(Value::as_array)
        .or_else(|| value.as_array());
    if let Some(blocks) = blocks {
        let texts: Vec<&str> = blocks
            .iter()
            .filter_map(|block| {
                block
                    .as_str()
                    .or_else(|| block.get("text").and_then(Value::as_str))
            })
            .collect();
        if !texts.is_empty() {
            return texts.join("\n");
        }
    }

    if let Some(text) = value.get("content").and_then(Value::as_str) {
        return text.to_string();
    }

    serde_json::to_string(value).unwrap_or_else(|_| value.to_string())
}
