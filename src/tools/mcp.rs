//! MCP client
//!
//! JSON-RPC 2.0 over HTTP POST against a Model Context Protocol server.
//! Startup discovery runs `initialize` then `tools/list`; tool calls go
//! through `tools/call` with a per-call timeout so a hung server cannot
//! stall a conversation turn.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde_json::{Value, json};

use crate::config::McpConfig;
use crate::{Error, Result};

use super::{ToolDefinition, ToolProvenance};

/// Client for one MCP server
pub struct McpClient {
    client: reqwest::Client,
    url: String,
    call_timeout: Duration,
    next_id: AtomicU64,
}

impl McpClient {
    /// Create a client for the configured server
    #[must_use]
    pub fn new(config: &McpConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: config.url.clone(),
            call_timeout: Duration::from_secs(config.call_timeout_secs),
            next_id: AtomicU64::new(1),
        }
    }

    /// Handshake with the server
    ///
    /// # Errors
    ///
    /// Returns error if the server is unreachable or rejects the handshake
    pub async fn initialize(&self) -> Result<()> {
        let result = self
            .request(
                "initialize",
                json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": {},
                    "clientInfo": { "name": "murmur", "version": env!("CARGO_PKG_VERSION") },
                }),
            )
            .await?;

        let server = result
            .pointer("/serverInfo/name")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        tracing::info!(server, "MCP session initialized");
        Ok(())
    }

    /// Fetch the server's tool list
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the response is malformed
    pub async fn list_tools(&self) -> Result<Vec<ToolDefinition>> {
        let result = self.request("tools/list", json!({})).await?;

        let tools = result
            .get("tools")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::Tool("tools/list response missing tools array".to_string()))?;

        let definitions = tools
            .iter()
            .filter_map(|tool| {
                let name = tool.get("name")?.as_str()?.to_string();
                let description = tool
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let parameters = tool
                    .get("inputSchema")
                    .cloned()
                    .unwrap_or_else(|| json!({ "type": "object", "properties": {} }));
                Some(ToolDefinition {
                    name,
                    description,
                    parameters,
                    provenance: ToolProvenance::Mcp,
                })
            })
            .collect::<Vec<_>>();

        tracing::debug!(count = definitions.len(), "MCP tools listed");
        Ok(definitions)
    }

    /// Execute a tool on the server
    ///
    /// # Errors
    ///
    /// Returns error if the call times out, fails, or returns no content
    pub async fn call_tool(&self, name: &str, arguments: &Value) -> Result<String> {
        tracing::debug!(tool = name, "MCP tool call");

        let call = self.request("tools/call", json!({ "name": name, "arguments": arguments }));
        let result = tokio::time::timeout(self.call_timeout, call)
            .await
            .map_err(|_| Error::Tool(format!("tool '{name}' timed out")))??;

        if result.get("isError").and_then(Value::as_bool) == Some(true) {
            let detail = extract_text(&result).unwrap_or_else(|| "unknown error".to_string());
            return Err(Error::Tool(format!("tool '{name}' failed: {detail}")));
        }

        extract_text(&result)
            .ok_or_else(|| Error::Tool(format!("tool '{name}' returned no text content")))
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let response = self.client.post(&self.url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Tool(format!("MCP server returned {status}")));
        }

        let payload: Value = response.json().await?;
        if let Some(error) = payload.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            return Err(Error::Tool(format!("MCP {method} failed: {message}")));
        }

        payload
            .get("result")
            .cloned()
            .ok_or_else(|| Error::Tool(format!("MCP {method} response missing result")))
    }
}

/// Concatenate the text blocks of a tools/call result
fn extract_text(result: &Value) -> Option<String> {
    let blocks = result.get("content")?.as_array()?;
    let text = blocks
        .iter()
        .filter_map(|block| {
            (block.get("type").and_then(Value::as_str) == Some("text"))
                .then(|| block.get("text").and_then(Value::as_str))
                .flatten()
        })
        .collect::<Vec<_>>()
        .join("\n");
    (!text.is_empty()).then_some(text)
}

/// Discover server tools, retrying with exponential backoff
///
/// The first attempt runs immediately; attempt `n` waits
/// `retry_base_delay_secs * 2^(n-2)` before running. Returns the empty
/// list only through `Err`, so the caller can decide to degrade to local
/// tools.
///
/// # Errors
///
/// Returns the last error once all attempts are exhausted
pub async fn discover_with_retry(
    client: &McpClient,
    config: &McpConfig,
) -> Result<Vec<ToolDefinition>> {
    let mut last_error = None;

    for attempt in 1..=config.retry_attempts {
        if attempt > 1 {
            let delay = retry_delay(config.retry_base_delay_secs, attempt);
            tracing::info!(attempt, delay_secs = delay.as_secs(), "retrying MCP discovery");
            tokio::time::sleep(delay).await;
        }

        match discover_once(client).await {
            Ok(tools) => {
                tracing::info!(count = tools.len(), attempt, "MCP discovery complete");
                return Ok(tools);
            }
            Err(e) => {
                tracing::warn!(attempt, error = %e, "MCP discovery attempt failed");
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| Error::Tool("MCP discovery never attempted".to_string())))
}

async fn discover_once(client: &McpClient) -> Result<Vec<ToolDefinition>> {
    client.initialize().await?;
    client.list_tools().await
}

/// Delay before attempt `n` (n >= 2)
fn retry_delay(base_secs: u64, attempt: u32) -> Duration {
    Duration::from_secs(base_secs.saturating_mul(1_u64 << (attempt - 2)))
}
