//! MCP tool endpoint (JSON-RPC 2.0 over `POST /mcp`)
//!
//! Exposes two tools to MCP clients:
//! - `agent_action {request}`: runs the tool dispatch loop
//! - `ask_gemini {prompt}`: one text-only model call

use crate::agent::Orchestrator;
use crate::audit::SessionSettings;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const PROTOCOL_VERSION: &str = "2024-11-05";

pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INVALID_REQUEST: i64 = -32600;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcResponse {
    fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    fn failure(id: Option<Value>, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

/// Normalized `tools/call` result. Every tool answer is a single text block.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallResult {
    pub content: Vec<TextContent>,
    #[serde(rename = "isError")]
    pub is_error: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TextContent {
    #[serde(rename = "type")]
    pub content_type: String,
    pub text: String,
}

impl ToolCallResult {
    pub fn text(text: String) -> Self {
        let is_error = is_error_text(&text);
        Self {
            content: vec![TextContent {
                content_type: "text".to_string(),
                text,
            }],
            is_error,
        }
    }
}

fn is_error_text(text: &str) -> bool {
    text.starts_with("Error") || text.starts_with("Agent Error:")
}

pub struct McpServer {
    orchestrator: Arc<Orchestrator>,
    sessions: SessionSettings,
}

impl McpServer {
    pub fn new(orchestrator: Arc<Orchestrator>, sessions: SessionSettings) -> Self {
        Self {
            orchestrator,
            sessions,
        }
    }

    /// Handle one message. Notifications (no id) get no response.
    pub async fn handle(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        debug!(method = %request.method, "MCP request");

        if request.id.is_none() && request.method.starts_with("notifications/") {
            return None;
        }

        let id = request.id.clone();
        if request.jsonrpc != "2.0" {
            return Some(JsonRpcResponse::failure(
                id,
                INVALID_REQUEST,
                "jsonrpc must be \"2.0\"",
            ));
        }

        let response = match request.method.as_str() {
            "initialize" => JsonRpcResponse::success(id, initialize_result()),
            "ping" => JsonRpcResponse::success(id, json!({})),
            "tools/list" => JsonRpcResponse::success(id, json!({ "tools": tool_descriptors() })),
            "tools/call" => match self.call_tool(request.params.as_ref()).await {
                Ok(result) => match serde_json::to_value(result) {
                    Ok(value) => JsonRpcResponse::success(id, value),
                    Err(e) => JsonRpcResponse::failure(id, INVALID_PARAMS, e.to_string()),
                },
                Err(message) => {
                    warn!(%message, "Rejected MCP tool call");
                    JsonRpcResponse::failure(id, INVALID_PARAMS, message)
                }
            },
            other => JsonRpcResponse::failure(
                id,
                METHOD_NOT_FOUND,
                format!("Method not found: {}", other),
            ),
        };

        Some(response)
    }

    async fn call_tool(&self, params: Option<&Value>) -> Result<ToolCallResult, String> {
        let params = params.ok_or_else(|| "missing params".to_string())?;
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| "missing tool name".to_string())?;
        let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

        match name {
            "agent_action" => {
                let text = required_string(&arguments, "request")?;
                info!(tool = name, "MCP agent action");

                let session = self.sessions.start().await;
                session.log_user_input(&text, &[]).await;
                session.log_routing("mcp", name).await;
                let answer = self.orchestrator.dispatch_loop().run(&text, &session).await;
                session.log_final_output(&answer).await;
                session.end().await;

                Ok(ToolCallResult::text(answer))
            }
            "ask_gemini" => {
                let prompt = required_string(&arguments, "prompt")?;
                info!(tool = name, "MCP general question");
                Ok(ToolCallResult::text(self.orchestrator.general().ask(&prompt).await))
            }
            other => Err(format!("Unknown tool: {}", other)),
        }
    }
}

fn required_string(arguments: &Value, key: &str) -> Result<String, String> {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| format!("argument '{}' must be a string", key))
}

fn initialize_result() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": { "tools": {} },
        "serverInfo": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
        }
    })
}

fn tool_descriptors() -> Value {
    json!([
        {
            "name": "agent_action",
            "description": "Carry out a mail, cloud storage or expense request using the agent's tools.",
            "inputSchema": {
                "type": "object",
                "properties": { "request": { "type": "string" } },
                "required": ["request"]
            }
        },
        {
            "name": "ask_gemini",
            "description": "Ask the language model a general question without tools.",
            "inputSchema": {
                "type": "object",
                "properties": { "prompt": { "type": "string" } },
                "required": ["prompt"]
            }
        }
    ])
}
