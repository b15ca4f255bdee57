use apollo_mcp::{JsonRpcResponse, RpcReply};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::Value;
use tracing::{Instrument as _, info_span};

use crate::app::AppState;

/// Stateless JSON-RPC over `POST /mcp`: no session, no lifecycle.
///
/// The backend credential is resolved per request but only demanded by `tools/call`.
pub async fn handle(
    State(st): State<AppState>,
    headers: HeaderMap,
    uri: Uri,
    body: String,
) -> Response {
    let payload: Value = match serde_json::from_str(&body) {
        Ok(v) => v,
        Err(e) => return jsonrpc_http_response(&JsonRpcResponse::parse_error(e.to_string())),
    };
    let is_batch = payload.is_array();

    // A single tools/call may carry the key next to its arguments.
    let key_source = payload
        .pointer("/params/arguments")
        .filter(|args| args.get("api_key").is_some())
        .unwrap_or(&payload);
    let client = st.client_for(&headers, &uri, Some(key_source)).ok();
    let dispatcher = st.dispatcher(client);

    let reply = dispatcher
        .handle_payload(payload)
        .instrument(info_span!("rpc.request", batch = is_batch))
        .await;
    match reply {
        RpcReply::Single(resp) => jsonrpc_http_response(&resp),
        RpcReply::Batch(resps) => jsonrpc_http_response(&resps),
        RpcReply::Nothing if is_batch => StatusCode::NO_CONTENT.into_response(),
        RpcReply::Nothing => StatusCode::ACCEPTED.into_response(),
    }
}

fn jsonrpc_http_response<T: Serialize>(body: &T) -> Response {
    let body = match serde_json::to_string(body) {
        Ok(b) => b,
        Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    };
    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "application/json")
        .body(axum::body::Body::from(body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
