//! JSON-RPC 2.0 tool server over stdio.
//!
//! One JSON message per line in, one per line out. Stdout carries nothing but
//! responses; logs go to stderr.

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use crate::commands::guide::{plan_guide, PLAN_GUIDE_NAME, PLAN_GUIDE_URI};
use crate::commands::{catalogue, Tools};

pub const PROTOCOL_VERSION: &str = "2024-11-05";
pub const SERVER_NAME: &str = "coach";
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

const PARSE_ERROR: i64 = -32700;
const INVALID_REQUEST: i64 = -32600;
const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;
const NOT_INITIALIZED: i64 = -32002;

#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
  #[serde(default)]
  pub jsonrpc: Option<String>,
  pub method: String,
  #[serde(default)]
  pub id: Option<Value>,
  #[serde(default)]
  pub params: Option<Value>,
}

pub fn json_rpc_response(id: Option<Value>, result: Value) -> Value {
  json!({
    "jsonrpc": "2.0",
    "id": id.unwrap_or(Value::Null),
    "result": result,
  })
}

pub fn json_rpc_error(id: Option<Value>, code: i64, message: &str) -> Value {
  json!({
    "jsonrpc": "2.0",
    "id": id.unwrap_or(Value::Null),
    "error": {"code": code, "message": message},
  })
}

pub struct McpServer {
  tools: Tools,
  initialized: bool,
}

impl McpServer {
  pub fn new(tools: Tools) -> Self {
    Self {
      tools,
      initialized: false,
    }
  }

  /// Handle one raw line. `None` means nothing is written back.
  pub async fn handle_line(&mut self, raw: &str) -> Option<Value> {
    let data: Value = match serde_json::from_str(raw) {
      Ok(v) => v,
      Err(e) => return Some(json_rpc_error(None, PARSE_ERROR, &format!("Parse error: {}", e))),
    };

    let id = match data.as_object() {
      Some(obj) if obj.contains_key("method") => obj.get("id").cloned(),
      Some(obj) => return Some(json_rpc_error(obj.get("id").cloned(), INVALID_REQUEST, "Invalid Request")),
      None => return Some(json_rpc_error(None, INVALID_REQUEST, "Invalid Request")),
    };

    match serde_json::from_value::<JsonRpcRequest>(data) {
      Ok(request) => self.handle(request).await,
      Err(e) => Some(json_rpc_error(
        id,
        INVALID_REQUEST,
        &format!("Invalid Request: {}", e),
      )),
    }
  }

  pub async fn handle(&mut self, request: JsonRpcRequest) -> Option<Value> {
    let method = request.method.as_str();
    debug!(method, "rpc request");

    if method == "initialize" {
      let version = request
        .params
        .as_ref()
        .and_then(|p| p.get("protocolVersion"))
        .and_then(Value::as_str)
        .unwrap_or(PROTOCOL_VERSION)
        .to_string();
      return Some(json_rpc_response(
        request.id,
        json!({
          "protocolVersion": version,
          "serverInfo": {"name": SERVER_NAME, "version": SERVER_VERSION},
          "capabilities": {"tools": {}, "resources": {}},
        }),
      ));
    }

    if method == "notifications/initialized" {
      self.initialized = true;
      info!("client initialized");
      return None;
    }

    // Other notifications need no answer
    if request.id.is_none() {
      return None;
    }

    if method == "ping" {
      return Some(json_rpc_response(request.id, json!({})));
    }

    if !self.initialized {
      return Some(json_rpc_error(request.id, NOT_INITIALIZED, "Server not initialized"));
    }

    match method {
      "tools/list" => Some(json_rpc_response(request.id, json!({"tools": catalogue()}))),
      "tools/call" => Some(self.call_tool(request.id, request.params).await),
      "resources/list" => Some(json_rpc_response(
        request.id,
        json!({
          "resources": [{
            "uri": PLAN_GUIDE_URI,
            "name": PLAN_GUIDE_NAME,
            "mimeType": "text/markdown",
          }]
        }),
      )),
      "resources/read" => Some(read_resource(request.id, request.params)),
      other => Some(json_rpc_error(
        request.id,
        METHOD_NOT_FOUND,
        &format!("Method not found: {}", other),
      )),
    }
  }

  async fn call_tool(&self, id: Option<Value>, params: Option<Value>) -> Value {
    let Some(params) = params.as_ref().and_then(Value::as_object) else {
      return json_rpc_error(id, INVALID_PARAMS, "params must be an object");
    };
    let Some(name) = params.get("name").and_then(Value::as_str) else {
      return json_rpc_error(id, INVALID_PARAMS, "params.name must be a string");
    };
    let args = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

    let (body, is_error) = match self.tools.call(name, args).await {
      Ok(result) => (result, false),
      Err(e) => (e.to_payload(), true),
    };
    json_rpc_response(
      id,
      json!({
        "content": [tool_text_content(&body)],
        "isError": is_error,
      }),
    )
  }
}

fn tool_text_content(body: &Value) -> Value {
  let text = serde_json::to_string_pretty(body).unwrap_or_else(|_| body.to_string());
  json!({"type": "text", "text": text})
}

fn read_resource(id: Option<Value>, params: Option<Value>) -> Value {
  let uri = params
    .as_ref()
    .and_then(|p| p.get("uri"))
    .and_then(Value::as_str);
  match uri {
    Some(PLAN_GUIDE_URI) => json_rpc_response(
      id,
      json!({
        "contents": [{
          "uri": PLAN_GUIDE_URI,
          "mimeType": "text/markdown",
          "text": plan_guide(),
        }]
      }),
    ),
    Some(other) => json_rpc_error(id, INVALID_PARAMS, &format!("Unknown resource: {}", other)),
    None => json_rpc_error(id, INVALID_PARAMS, "params.uri must be a string"),
  }
}

/// Serve requests from `reader` until it reaches end of input
pub async fn run<R, W>(server: &mut McpServer, reader: R, mut writer: W) -> std::io::Result<()>
where
  R: AsyncBufRead + Unpin,
  W: AsyncWrite + Unpin,
{
  let mut lines = reader.lines();
  while let Some(line) = lines.next_line().await? {
    if line.trim().is_empty() {
      continue;
    }
    if let Some(response) = server.handle_line(&line).await {
      let mut out = response.to_string();
      out.push('\n');
      writer.write_all(out.as_bytes()).await?;
      writer.flush().await?;
    }
  }
  Ok(())
}

pub async fn run_stdio(tools: Tools) -> std::io::Result<()> {
  let mut server = McpServer::new(tools);
  info!("mcp server listening on stdio");
  let result = run(
    &mut server,
    BufReader::new(tokio::io::stdin()),
    tokio::io::stdout(),
  )
  .await;
  if let Err(e) = &result {
    warn!("stdio loop ended: {}", e);
  }
  result
}
