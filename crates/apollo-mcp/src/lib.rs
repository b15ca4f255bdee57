//! Model Context Protocol (MCP) primitives used by the Apollo gateway.
//!
//! Covers the JSON-RPC 2.0 envelope model, the server lifecycle for framed
//! transports (stdio, SSE) and the lifecycle-free dispatcher used by the
//! stateless HTTP surface.

mod jsonrpc;
mod server;
mod sse;
mod types;

pub use jsonrpc::{
    INVALID_PARAMS, INVALID_REQUEST, JsonRpcError, JsonRpcId, JsonRpcMessage,
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, METHOD_NOT_FOUND, NOT_INITIALIZED,
    PARSE_ERROR, SERVER_ERROR,
};
pub use server::{HandlerError, McpConnection, McpDispatcher, McpHandler, McpServerConfig, RpcReply};
pub use sse::{SseEvent, decode_sse_events, split_complete_events};
pub use types::{
    CallToolParams, CallToolResult, ContentBlock, InitializeParams, InitializeResult,
    ListToolsParams, ListToolsResult, McpClientInfo, McpServerInfo, Tool,
};

/// Latest protocol version supported by this implementation.
pub const PROTOCOL_VERSION_LATEST: &str = "2025-06-18";

pub const PROTOCOL_VERSION_2025_03_26: &str = "2025-03-26";

/// The HTTP+SSE transport generation; still what most SSE clients send.
pub const PROTOCOL_VERSION_2024_11_05: &str = "2024-11-05";
