use std::convert::Infallible;

use apollo_mcp::{McpConnection, RpcReply};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{self, Stream, StreamExt as _};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::{Instrument as _, error, info, info_span};

use crate::app::AppState;
use crate::error::GatewayError;
use crate::sessions::{SessionRegistry, SessionStream};

const INBOUND_BUFFER: usize = 32;
const OUTBOUND_BUFFER: usize = 64;

/// Registry-side handle of one open event stream.
pub struct SseSession {
    inbound: mpsc::Sender<Value>,
    closed: watch::Sender<bool>,
}

impl SessionStream for SseSession {
    fn close(&self) -> anyhow::Result<()> {
        self.closed
            .send(true)
            .map_err(|_| anyhow::anyhow!("event stream already gone"))
    }
}

/// Removes the session when the response stream is dropped (client disconnect).
struct SessionGuard {
    sessions: SessionRegistry<SseSession>,
    id: String,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.sessions.remove(&self.id);
    }
}

type StreamState = (mpsc::Receiver<Event>, watch::Receiver<bool>, SessionGuard);

pub async fn open(
    State(st): State<AppState>,
    headers: HeaderMap,
    uri: Uri,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, GatewayError> {
    let client = st.client_for(&headers, &uri, None)?;
    let conn = McpConnection::new(st.dispatcher(Some(client)));

    let (out_tx, out_rx) = mpsc::channel(OUTBOUND_BUFFER);
    let (in_tx, in_rx) = mpsc::channel(INBOUND_BUFFER);
    let (closed_tx, closed_rx) = watch::channel(false);
    let id = st.sessions.create(
        SseSession {
            inbound: in_tx,
            closed: closed_tx,
        },
        Some(Box::new(|id: &str| info!(session_id = %id, "sse session closed"))),
    );
    info!(session_id = %id, "sse session opened");

    tokio::spawn(
        run_session(conn, in_rx, out_tx).instrument(info_span!("sse.session", session_id = %id)),
    );

    let endpoint = Event::default()
        .event("endpoint")
        .data(format!("/messages?sessionId={id}"));
    let guard = SessionGuard {
        sessions: st.sessions.clone(),
        id,
    };
    let events = stream::once(async move { Ok(endpoint) })
        .chain(stream::unfold((out_rx, closed_rx, guard), next_event));

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

async fn next_event(state: StreamState) -> Option<(Result<Event, Infallible>, StreamState)> {
    let (mut rx, mut closed, guard) = state;
    if *closed.borrow() {
        return None;
    }
    tokio::select! {
        ev = rx.recv() => ev.map(|ev| (Ok(ev), (rx, closed, guard))),
        _ = closed.changed() => None,
    }
}

/// Feeds inbound messages through the session's connection, in arrival order.
async fn run_session(
    mut conn: McpConnection,
    mut inbound: mpsc::Receiver<Value>,
    outbound: mpsc::Sender<Event>,
) {
    while let Some(payload) = inbound.recv().await {
        let data = match conn.handle_payload(payload).await {
            RpcReply::Single(resp) => serde_json::to_string(&resp),
            RpcReply::Batch(resps) => serde_json::to_string(&resps),
            RpcReply::Nothing => continue,
        };
        let data = match data {
            Ok(d) => d,
            Err(e) => {
                error!(error = %e, "serialize json-rpc response");
                continue;
            }
        };
        if outbound
            .send(Event::default().event("message").data(data))
            .await
            .is_err()
        {
            break;
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct MessagesQuery {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

pub async fn message(
    State(st): State<AppState>,
    Query(q): Query<MessagesQuery>,
    body: String,
) -> Result<(StatusCode, &'static str), GatewayError> {
    let id = q
        .session_id
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            GatewayError::validation("sessionId query parameter is required", &["sessionId"])
        })?;
    let session = st
        .sessions
        .lookup(&id)
        .ok_or_else(|| GatewayError::SessionNotFound(id.clone()))?;
    let payload: Value = serde_json::from_str(&body)
        .map_err(|e| GatewayError::validation(format!("invalid JSON body: {e}"), &[]))?;

    session
        .inbound
        .send(payload)
        .await
        .map_err(|_| GatewayError::SessionNotFound(id))?;
    Ok((StatusCode::ACCEPTED, "Accepted"))
}
