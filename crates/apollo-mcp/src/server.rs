use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::jsonrpc::{
    INVALID_PARAMS, JSONRPC_VERSION, JsonRpcError, JsonRpcId, JsonRpcMessage,
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, METHOD_NOT_FOUND, NOT_INITIALIZED,
    SERVER_ERROR,
};
use crate::types::{
    CallToolParams, CallToolResult, InitializeParams, InitializeResult, ListToolsParams,
    ListToolsResult, McpServerInfo,
};
use crate::{PROTOCOL_VERSION_2024_11_05, PROTOCOL_VERSION_2025_03_26, PROTOCOL_VERSION_LATEST};

/// Failure kinds a tool handler reports back to the protocol layer.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
    #[error("{message}")]
    InvalidParams {
        message: String,
        data: Option<Value>,
    },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl HandlerError {
    fn into_jsonrpc(self) -> JsonRpcError {
        match self {
            Self::UnknownTool(name) => JsonRpcError {
                code: METHOD_NOT_FOUND,
                message: format!("Unknown tool: {name}"),
                data: Some(serde_json::json!({ "tool": name })),
            },
            Self::InvalidParams { message, data } => JsonRpcError {
                code: INVALID_PARAMS,
                message,
                data,
            },
            Self::Internal(e) => JsonRpcError {
                code: SERVER_ERROR,
                message: e.to_string(),
                data: None,
            },
        }
    }
}

#[async_trait]
pub trait McpHandler: Send + Sync {
    async fn list_tools(&self, params: ListToolsParams) -> Result<ListToolsResult, HandlerError>;
    async fn call_tool(&self, params: CallToolParams) -> Result<CallToolResult, HandlerError>;
}

#[derive(Debug, Clone)]
pub struct McpServerConfig {
    pub server_info: McpServerInfo,
    pub instructions: Option<String>,
    pub capabilities: Value,
    pub supported_protocol_versions: Vec<String>,
}

impl McpServerConfig {
    pub fn default_for_binary(name: &str, version: &str) -> Self {
        Self {
            server_info: McpServerInfo {
                name: name.to_string(),
                version: version.to_string(),
            },
            instructions: None,
            capabilities: serde_json::json!({
                "resources": {},
                "tools": {
                    "listChanged": false
                }
            }),
            supported_protocol_versions: vec![
                PROTOCOL_VERSION_LATEST.to_string(),
                PROTOCOL_VERSION_2025_03_26.to_string(),
                PROTOCOL_VERSION_2024_11_05.to_string(),
            ],
        }
    }

    fn negotiate_protocol(&self, requested: &str) -> String {
        if self
            .supported_protocol_versions
            .iter()
            .any(|v| v == requested)
        {
            requested.to_string()
        } else {
            PROTOCOL_VERSION_LATEST.to_string()
        }
    }
}

/// What a transport should write back for one inbound payload.
#[derive(Debug)]
pub enum RpcReply {
    Single(JsonRpcResponse),
    Batch(Vec<JsonRpcResponse>),
    /// Notifications only, or a batch with no addressable entries.
    Nothing,
}

fn method_not_found(id: JsonRpcId, method: &str) -> JsonRpcResponse {
    JsonRpcResponse::err(
        id,
        JsonRpcError {
            code: METHOD_NOT_FOUND,
            message: "method not found".to_string(),
            data: Some(serde_json::json!({ "method": method })),
        },
    )
}

fn invalid_params(id: JsonRpcId, detail: String) -> JsonRpcResponse {
    JsonRpcResponse::err(
        id,
        JsonRpcError {
            code: INVALID_PARAMS,
            message: "invalid params".to_string(),
            data: Some(serde_json::json!({ "detail": detail })),
        },
    )
}

fn not_initialized(id: JsonRpcId) -> JsonRpcResponse {
    JsonRpcResponse::err(
        id,
        JsonRpcError {
            code: NOT_INITIALIZED,
            message: "not initialized".to_string(),
            data: None,
        },
    )
}

/// Decode one raw envelope.
///
/// `Err(Some(_))` is an error reply for an undecodable but addressable envelope,
/// `Err(None)` means the envelope had no id and is dropped. An envelope that
/// carries an `id` key is always answered, even when the id itself is unusable
/// (fractional, out of range); the reply then goes to id `null`.
fn decode_envelope(raw: Value) -> Result<JsonRpcMessage, Option<JsonRpcResponse>> {
    let has_id = raw.get("id").is_some();
    let id = JsonRpcMessage::id_of_raw(&raw);
    let has_method = raw.get("method").is_some();
    let reject = |detail: String| {
        has_id.then(|| JsonRpcResponse::invalid_request(id.clone().unwrap_or(JsonRpcId::Null), detail))
    };

    match serde_json::from_value::<JsonRpcMessage>(raw) {
        // A response-shaped decode of something that is neither a request nor a response.
        Ok(JsonRpcMessage::Response(r))
            if has_method || (r.result.is_none() && r.error.is_none()) =>
        {
            Err(reject("missing or malformed method".to_string()))
        }
        Ok(JsonRpcMessage::Notification(_)) if has_id => {
            Err(reject("id must be a string, an integer or null".to_string()))
        }
        Ok(msg) => Ok(msg),
        Err(e) => Err(reject(e.to_string())),
    }
}

/// Lifecycle-free request routing shared by every transport.
#[derive(Clone)]
pub struct McpDispatcher {
    cfg: Arc<McpServerConfig>,
    handler: Arc<dyn McpHandler>,
}

impl McpDispatcher {
    pub fn new(cfg: McpServerConfig, handler: Arc<dyn McpHandler>) -> Self {
        Self {
            cfg: Arc::new(cfg),
            handler,
        }
    }

    /// Decode and route one payload, which may be a single envelope or a batch.
    pub async fn handle_payload(&self, payload: Value) -> RpcReply {
        match payload {
            Value::Array(entries) => match self.handle_batch(entries).await {
                Some(responses) => RpcReply::Batch(responses),
                None => RpcReply::Nothing,
            },
            single => match decode_envelope(single) {
                Ok(msg) => match self.handle_message(msg).await {
                    Some(resp) => RpcReply::Single(resp),
                    None => RpcReply::Nothing,
                },
                Err(reply) => RpcReply::Single(reply.unwrap_or_else(|| {
                    JsonRpcResponse::invalid_request(JsonRpcId::Null, "not a json-rpc envelope")
                })),
            },
        }
    }

    /// Entries run concurrently; responses keep input order and notifications are dropped.
    ///
    /// Returns `None` when nothing in the batch is answerable.
    pub async fn handle_batch(&self, entries: Vec<Value>) -> Option<Vec<JsonRpcResponse>> {
        let pending = entries.into_iter().map(|raw| async move {
            match decode_envelope(raw) {
                Ok(msg) => self.handle_message(msg).await,
                Err(reply) => reply,
            }
        });
        let responses = join_all(pending)
            .await
            .into_iter()
            .flatten()
            .collect::<Vec<_>>();
        if responses.is_empty() {
            None
        } else {
            Some(responses)
        }
    }

    pub async fn handle_message(&self, msg: JsonRpcMessage) -> Option<JsonRpcResponse> {
        match msg {
            JsonRpcMessage::Request(req) => Some(self.handle_request(req).await),
            JsonRpcMessage::Notification(n) => {
                debug!(method = %n.method, "notification ignored");
                None
            }
            JsonRpcMessage::Response(_) => None,
        }
    }

    pub async fn handle_request(&self, req: JsonRpcRequest) -> JsonRpcResponse {
        if req.jsonrpc != JSONRPC_VERSION {
            return JsonRpcResponse::invalid_request(req.id, "invalid jsonrpc version");
        }

        match req.method.as_str() {
            "initialize" => match self.initialize(req.params) {
                Ok(result) => JsonRpcResponse::ok(req.id, result),
                Err(detail) => invalid_params(req.id, detail),
            },
            "ping" => JsonRpcResponse::ok(req.id, serde_json::json!({})),
            "tools/list" => self.list_tools(req.id, req.params).await,
            "tools/call" => self.call_tool(req.id, req.params).await,
            other => method_not_found(req.id, other),
        }
    }

    fn initialize(&self, params: Option<Value>) -> Result<Value, String> {
        let Some(params) = params else {
            return Err("missing params".to_string());
        };
        let init: InitializeParams = serde_json::from_value(params).map_err(|e| e.to_string())?;

        let result = InitializeResult {
            protocol_version: self.cfg.negotiate_protocol(&init.protocol_version),
            capabilities: self.cfg.capabilities.clone(),
            server_info: self.cfg.server_info.clone(),
            instructions: self.cfg.instructions.clone(),
        };
        serde_json::to_value(result).map_err(|e| e.to_string())
    }

    async fn list_tools(&self, id: JsonRpcId, params: Option<Value>) -> JsonRpcResponse {
        let params = match params {
            Some(Value::Null) | None => Ok(ListToolsParams::default()),
            Some(v) => serde_json::from_value::<ListToolsParams>(v).map_err(|e| e.to_string()),
        };
        let params = match params {
            Ok(p) => p,
            Err(e) => return invalid_params(id, e),
        };

        match self.handler.list_tools(params).await {
            Ok(res) => JsonRpcResponse::ok(id, serde_json::to_value(res).unwrap_or(Value::Null)),
            Err(e) => JsonRpcResponse::err(id, e.into_jsonrpc()),
        }
    }

    async fn call_tool(&self, id: JsonRpcId, params: Option<Value>) -> JsonRpcResponse {
        let Some(v) = params else {
            return invalid_params(id, "missing params".to_string());
        };
        let params = match serde_json::from_value::<CallToolParams>(v) {
            Ok(p) if p.name.trim().is_empty() => {
                return invalid_params(id, "tool name must not be empty".to_string());
            }
            Ok(p) => p,
            Err(e) => return invalid_params(id, e.to_string()),
        };

        match self.handler.call_tool(params).await {
            Ok(res) => JsonRpcResponse::ok(id, serde_json::to_value(res).unwrap_or(Value::Null)),
            Err(e) => JsonRpcResponse::err(id, e.into_jsonrpc()),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum ConnState {
    New,
    InitResponded,
    Ready,
}

/// MCP connection state machine (lifecycle enforcement on top of [`McpDispatcher`]).
pub struct McpConnection {
    dispatcher: McpDispatcher,
    state: ConnState,
}

impl McpConnection {
    pub fn new(dispatcher: McpDispatcher) -> Self {
        Self {
            dispatcher,
            state: ConnState::New,
        }
    }

    /// Like [`McpDispatcher::handle_payload`], but batch entries run in order since
    /// each one may advance the lifecycle.
    pub async fn handle_payload(&mut self, payload: Value) -> RpcReply {
        match payload {
            Value::Array(entries) => {
                let mut responses = Vec::new();
                for raw in entries {
                    let reply = match decode_envelope(raw) {
                        Ok(msg) => self.handle_message(msg).await,
                        Err(reply) => reply,
                    };
                    responses.extend(reply);
                }
                if responses.is_empty() {
                    RpcReply::Nothing
                } else {
                    RpcReply::Batch(responses)
                }
            }
            single => match decode_envelope(single) {
                Ok(msg) => match self.handle_message(msg).await {
                    Some(resp) => RpcReply::Single(resp),
                    None => RpcReply::Nothing,
                },
                Err(reply) => RpcReply::Single(reply.unwrap_or_else(|| {
                    JsonRpcResponse::invalid_request(JsonRpcId::Null, "not a json-rpc envelope")
                })),
            },
        }
    }

    /// Handle a single JSON-RPC message.
    ///
    /// Returns `Some(response)` for requests, `None` for notifications or ignored messages.
    pub async fn handle_message(&mut self, msg: JsonRpcMessage) -> Option<JsonRpcResponse> {
        match msg {
            JsonRpcMessage::Request(req) => Some(self.handle_request(req).await),
            JsonRpcMessage::Notification(n) => {
                self.handle_notification(n);
                None
            }
            JsonRpcMessage::Response(_) => None,
        }
    }

    async fn handle_request(&mut self, req: JsonRpcRequest) -> JsonRpcResponse {
        match req.method.as_str() {
            "initialize" => {
                if self.state != ConnState::New {
                    return JsonRpcResponse::invalid_request(req.id, "already initialized");
                }
                let resp = self.dispatcher.handle_request(req).await;
                if resp.result.is_some() {
                    self.state = ConnState::InitResponded;
                }
                resp
            }
            "tools/list" | "tools/call" if self.state != ConnState::Ready => {
                not_initialized(req.id)
            }
            _ => self.dispatcher.handle_request(req).await,
        }
    }

    fn handle_notification(&mut self, n: JsonRpcNotification) {
        if n.jsonrpc != JSONRPC_VERSION {
            return;
        }

        if n.method.as_str() == "notifications/initialized"
            && self.state == ConnState::InitResponded
        {
            self.state = ConnState::Ready;
        }
    }
}
