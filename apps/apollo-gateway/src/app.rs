use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context as _;
use apollo_client::{ApolloClient, ApolloClientOptions, ApolloConnector};
use apollo_mcp::{McpDispatcher, McpServerConfig};
use axum::extract::State;
use axum::http::{HeaderMap, Request, Uri};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::Value;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::credentials::CredentialResolver;
use crate::error::GatewayError;
use crate::lifecycle::ShutdownHook;
use crate::middleware::require_server_token;
use crate::sessions::SessionRegistry;
use crate::sse::SseSession;
use crate::tools::{ApolloToolHandler, ToolRegistry};
use crate::{rest, rpc, sse};

pub const SERVER_NAME: &str = "apollo-io-mcp-server";

#[derive(Debug, Clone)]
pub struct GatewayOptions {
    pub api_key: Option<String>,
    pub default_api_key: Option<String>,
    pub server_token: Option<String>,
    pub apollo: ApolloClientOptions,
}

#[derive(Clone)]
pub struct AppState {
    pub tools: Arc<ToolRegistry>,
    pub connector: ApolloConnector,
    pub credentials: CredentialResolver,
    pub mcp: McpServerConfig,
    pub sessions: SessionRegistry<SseSession>,
    pub shutdown: Arc<ShutdownHook<SseSession>>,
    server_token: Option<Arc<str>>,
}

impl AppState {
    pub fn new(opts: GatewayOptions) -> anyhow::Result<Self> {
        let server_token = opts
            .server_token
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .map(Arc::<str>::from);
        let credentials = CredentialResolver::new(
            opts.api_key,
            opts.default_api_key,
            server_token.is_some(),
        );
        let connector = ApolloConnector::new(opts.apollo).context("build apollo connector")?;
        let tools = Arc::new(ToolRegistry::new()?);
        let sessions = SessionRegistry::new();
        let shutdown = ShutdownHook::new(sessions.clone());

        Ok(Self {
            tools,
            connector,
            credentials,
            mcp: McpServerConfig::default_for_binary(SERVER_NAME, env!("CARGO_PKG_VERSION")),
            sessions,
            shutdown,
            server_token,
        })
    }

    /// Backend client for a request, using the configured credential precedence.
    pub fn client_for(
        &self,
        headers: &HeaderMap,
        uri: &Uri,
        body: Option<&Value>,
    ) -> Result<ApolloClient, GatewayError> {
        let key = self.credentials.resolve(headers, uri, body)?;
        Ok(self.connector.client(key)?)
    }

    pub fn dispatcher(&self, client: Option<ApolloClient>) -> McpDispatcher {
        let handler = Arc::new(ApolloToolHandler::new(self.tools.clone(), client));
        McpDispatcher::new(self.mcp.clone(), handler)
    }
}

pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind tcp {addr}"))?;
    let local_addr = listener.local_addr()?;
    info!(addr = %local_addr, "apollo gateway listening");

    let shutdown = state.shutdown.clone();
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.wait().await })
        .await
        .context("serve http")?;
    info!("http server stopped");
    Ok(())
}

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/mcp", get(sse::open).post(rpc::handle))
        .route("/sse", get(sse::open))
        .route("/messages", post(sse::message))
        .nest("/api", rest::routes());
    let protected = match &state.server_token {
        Some(token) => protected.layer(axum::middleware::from_fn_with_state(
            token.clone(),
            require_server_token,
        )),
        None => protected,
    };

    Router::new()
        .route("/health", get(health))
        .route("/api/tools", get(rest::list_tools))
        .merge(protected)
        .layer(
            TraceLayer::new_for_http().make_span_with(|req: &Request<_>| {
                // Headers carry credentials; keep them out of spans.
                tracing::info_span!(
                    "http.request",
                    http_method = %req.method(),
                    http_path = %req.uri().path(),
                )
            }),
        )
        .with_state(state)
}

async fn health(State(st): State<AppState>) -> Json<Value> {
    Json(serde_json::json!({
        "status": "ok",
        "active_sessions": st.sessions.len(),
        "ts": Utc::now().to_rfc3339(),
    }))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use apollo_mcp::{SseEvent, split_complete_events};
    use axum::extract::Path;
    use axum::http::StatusCode;

    use super::*;

    const OPERATION_NAMES: [&str; 7] = [
        "people_enrichment",
        "organization_enrichment",
        "people_search",
        "organization_search",
        "organization_job_postings",
        "get_person_email",
        "employees_of_company",
    ];

    #[derive(Clone, Default)]
    struct MockApolloState {
        calls: Arc<Mutex<Vec<(String, Option<String>)>>>,
    }

    impl MockApolloState {
        fn record(&self, path: &str, headers: &HeaderMap) {
            let key = headers
                .get("x-api-key")
                .and_then(|h| h.to_str().ok())
                .map(str::to_string);
            self.calls
                .lock()
                .expect("lock")
                .push((path.to_string(), key));
        }

        fn calls(&self) -> Vec<(String, Option<String>)> {
            self.calls.lock().expect("lock").clone()
        }
    }

    async fn start_mock_apollo()
    -> anyhow::Result<(SocketAddr, MockApolloState, tokio::task::JoinHandle<()>)> {
        async fn people_search(
            State(st): State<MockApolloState>,
            headers: HeaderMap,
            Json(body): Json<Value>,
        ) -> Json<Value> {
            st.record("mixed_people/search", &headers);
            Json(serde_json::json!({ "people": [{ "id": "p-1" }], "echo": body }))
        }

        async fn companies(State(st): State<MockApolloState>, headers: HeaderMap) -> Json<Value> {
            st.record("mixed_companies/search", &headers);
            Json(serde_json::json!({ "organizations": [] }))
        }

        async fn job_postings(
            State(st): State<MockApolloState>,
            headers: HeaderMap,
            Path(id): Path<String>,
        ) -> (StatusCode, Json<Value>) {
            st.record("job_postings", &headers);
            if id == "broken" {
                return (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    Json(serde_json::json!({ "error": "bad organization" })),
                );
            }
            (
                StatusCode::OK,
                Json(serde_json::json!({ "organization_job_postings": [] })),
            )
        }

        async fn prospects(State(st): State<MockApolloState>, headers: HeaderMap) -> Json<Value> {
            st.record("add_to_my_prospects", &headers);
            Json(serde_json::json!({ "contacts": [{ "email": "tim@apollo.io" }] }))
        }

        let st = MockApolloState::default();
        let app = Router::new()
            .route("/api/v1/mixed_people/search", post(people_search))
            .route("/api/v1/mixed_companies/search", post(companies))
            .route("/api/v1/organizations/{id}/job_postings", get(job_postings))
            .route("/app/v1/mixed_people/add_to_my_prospects", post(prospects))
            .with_state(st.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Ok((addr, st, handle))
    }

    async fn start_gateway(
        apollo_addr: SocketAddr,
        server_token: Option<&str>,
    ) -> anyhow::Result<(AppState, String, tokio::task::JoinHandle<()>)> {
        let state = AppState::new(GatewayOptions {
            api_key: None,
            default_api_key: None,
            server_token: server_token.map(str::to_string),
            apollo: ApolloClientOptions::new(
                &format!("http://{apollo_addr}/api/v1"),
                &format!("http://{apollo_addr}/app/v1"),
            )?,
        })?;
        let app = router(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let shutdown = state.shutdown.clone();
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.wait().await })
                .await;
        });
        Ok((state, format!("http://{addr}"), handle))
    }

    /// Reads SSE events off a streaming response until `n` have arrived.
    async fn read_events(resp: &mut reqwest::Response, n: usize) -> anyhow::Result<Vec<SseEvent>> {
        let mut buf = String::new();
        let mut events = Vec::new();
        while events.len() < n {
            let chunk = tokio::time::timeout(Duration::from_secs(5), resp.chunk())
                .await??
                .ok_or_else(|| anyhow::anyhow!("stream ended early"))?;
            buf.push_str(std::str::from_utf8(&chunk)?);
            let (complete, rest) = split_complete_events(&buf);
            let rest = rest.to_string();
            events.extend(complete.into_iter().filter(|e| !e.data.is_empty()));
            buf = rest;
        }
        Ok(events)
    }

    async fn wait_for_sessions(state: &AppState, n: usize) -> anyhow::Result<()> {
        for _ in 0..100 {
            if state.sessions.len() == n {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        anyhow::bail!("expected {n} sessions, have {}", state.sessions.len())
    }

    #[tokio::test]
    async fn health_reports_active_sessions_without_credentials() -> anyhow::Result<()> {
        let (apollo_addr, _apollo, apollo_task) = start_mock_apollo().await?;
        let (state, base, gw_task) = start_gateway(apollo_addr, Some("srv-token")).await?;
        let http = reqwest::Client::new();

        let v: Value = http.get(format!("{base}/health")).send().await?.json().await?;
        assert_eq!(v["status"], "ok");
        assert_eq!(v["active_sessions"], 0);

        let _stream = http
            .get(format!("{base}/sse"))
            .bearer_auth("srv-token")
            .header("x-api-key", "k")
            .send()
            .await?;
        wait_for_sessions(&state, 1).await?;
        let v: Value = http.get(format!("{base}/health")).send().await?.json().await?;
        assert_eq!(v["active_sessions"], 1);

        state.shutdown.trigger();
        gw_task.abort();
        apollo_task.abort();
        Ok(())
    }

    #[tokio::test]
    async fn missing_credential_is_401_on_rest_and_stream_open() -> anyhow::Result<()> {
        let (apollo_addr, apollo, apollo_task) = start_mock_apollo().await?;
        let (_state, base, gw_task) = start_gateway(apollo_addr, None).await?;
        let http = reqwest::Client::new();

        for resp in [
            http.post(format!("{base}/api/people/search"))
                .json(&serde_json::json!({}))
                .send()
                .await?,
            http.get(format!("{base}/mcp")).send().await?,
        ] {
            assert_eq!(resp.status(), reqwest::StatusCode::UNAUTHORIZED);
            let v: Value = resp.json().await?;
            assert_eq!(v["success"], false);
            assert_eq!(v["code"], "missing_credentials");
            let methods = v["details"]["accepted_methods"]
                .as_array()
                .expect("methods")
                .len();
            assert_eq!(methods, 6);
        }
        assert!(apollo.calls().is_empty());

        gw_task.abort();
        apollo_task.abort();
        Ok(())
    }

    #[tokio::test]
    async fn server_token_guards_everything_but_health_and_discovery() -> anyhow::Result<()> {
        let (apollo_addr, _apollo, apollo_task) = start_mock_apollo().await?;
        let (_state, base, gw_task) = start_gateway(apollo_addr, Some("srv-token")).await?;
        let http = reqwest::Client::new();

        let resp = http
            .post(format!("{base}/api/people/search"))
            .header("x-api-key", "k")
            .json(&serde_json::json!({}))
            .send()
            .await?;
        assert_eq!(resp.status(), reqwest::StatusCode::UNAUTHORIZED);

        let resp = http
            .post(format!("{base}/api/people/search"))
            .header("x-gateway-token", "srv-token")
            .header("x-api-key", "k")
            .json(&serde_json::json!({}))
            .send()
            .await?;
        assert_eq!(resp.status(), reqwest::StatusCode::OK);

        let resp = http.get(format!("{base}/api/tools")).send().await?;
        assert_eq!(resp.status(), reqwest::StatusCode::OK);

        gw_task.abort();
        apollo_task.abort();
        Ok(())
    }

    #[tokio::test]
    async fn rest_discovery_and_operation_routes() -> anyhow::Result<()> {
        let (apollo_addr, apollo, apollo_task) = start_mock_apollo().await?;
        let (_state, base, gw_task) = start_gateway(apollo_addr, None).await?;
        let http = reqwest::Client::new();

        let v: Value = http.get(format!("{base}/api/tools")).send().await?.json().await?;
        let names = v["data"]["tools"]
            .as_array()
            .expect("tools")
            .iter()
            .filter_map(|t| t["name"].as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, OPERATION_NAMES);

        let v: Value = http
            .post(format!("{base}/api/people/search?api_key=from-query"))
            .json(&serde_json::json!({ "person_titles": ["cto"] }))
            .send()
            .await?
            .json()
            .await?;
        assert_eq!(v["success"], true);
        assert_eq!(v["operation"], "people_search");
        assert_eq!(v["data"]["echo"]["person_titles"], serde_json::json!(["cto"]));

        let v: Value = http
            .get(format!("{base}/api/people/p-1/email"))
            .header("x-apollo-api-key", "dedicated")
            .send()
            .await?
            .json()
            .await?;
        assert_eq!(v["data"], serde_json::json!(["tim@apollo.io"]));

        let calls = apollo.calls();
        assert_eq!(calls[0], ("mixed_people/search".to_string(), Some("from-query".to_string())));
        assert_eq!(calls[1], ("add_to_my_prospects".to_string(), Some("dedicated".to_string())));

        gw_task.abort();
        apollo_task.abort();
        Ok(())
    }

    #[tokio::test]
    async fn rest_errors_keep_their_kinds_apart() -> anyhow::Result<()> {
        let (apollo_addr, apollo, apollo_task) = start_mock_apollo().await?;
        let (_state, base, gw_task) = start_gateway(apollo_addr, None).await?;
        let http = reqwest::Client::new();

        let resp = http
            .post(format!("{base}/api/tools/delete_everything"))
            .header("x-api-key", "k")
            .json(&serde_json::json!({}))
            .send()
            .await?;
        assert_eq!(resp.status(), reqwest::StatusCode::NOT_IMPLEMENTED);
        let v: Value = resp.json().await?;
        assert_eq!(v["code"], "unknown_operation");
        assert_eq!(v["details"]["operation"], "delete_everything");

        let resp = http
            .get(format!("{base}/api/organizations/enrich"))
            .header("x-api-key", "k")
            .send()
            .await?;
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
        let v: Value = resp.json().await?;
        assert_eq!(v["details"]["required"], serde_json::json!(["domain"]));

        let resp = http
            .post(format!("{base}/api/companies/employees"))
            .header("x-api-key", "k")
            .json(&serde_json::json!({ "company": "Ghost Corp" }))
            .send()
            .await?;
        assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
        let v: Value = resp.json().await?;
        assert!(v["message"].as_str().is_some_and(|m| m.contains("Ghost Corp")));

        let resp = http
            .get(format!("{base}/api/organizations/broken/job-postings"))
            .header("x-api-key", "k")
            .send()
            .await?;
        assert_eq!(resp.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);
        let v: Value = resp.json().await?;
        assert_eq!(v["code"], "backend_error");
        assert_eq!(v["details"]["status"], 422);

        let paths = apollo.calls().into_iter().map(|(p, _)| p).collect::<Vec<_>>();
        assert_eq!(paths, vec!["mixed_companies/search", "job_postings"]);

        gw_task.abort();
        apollo_task.abort();
        Ok(())
    }

    #[tokio::test]
    async fn stateless_rpc_batch_drops_notifications_and_keeps_order() -> anyhow::Result<()> {
        let (apollo_addr, _apollo, apollo_task) = start_mock_apollo().await?;
        let (_state, base, gw_task) = start_gateway(apollo_addr, None).await?;
        let http = reqwest::Client::new();

        let resp = http
            .post(format!("{base}/mcp"))
            .json(&serde_json::json!([
                { "jsonrpc": "2.0", "id": 1, "method": "tools/list" },
                { "jsonrpc": "2.0", "method": "tools/list" },
                { "jsonrpc": "2.0", "id": 3, "method": "ping" }
            ]))
            .send()
            .await?;
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        let v: Value = resp.json().await?;
        let out = v.as_array().expect("batch");
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["id"], 1);
        assert_eq!(out[0]["result"]["tools"].as_array().map(Vec::len), Some(7));
        assert_eq!(out[1]["id"], 3);

        let resp = http
            .post(format!("{base}/mcp"))
            .json(&serde_json::json!([{ "jsonrpc": "2.0", "method": "notifications/initialized" }]))
            .send()
            .await?;
        assert_eq!(resp.status(), reqwest::StatusCode::NO_CONTENT);

        let resp = http
            .post(format!("{base}/mcp"))
            .json(&serde_json::json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }))
            .send()
            .await?;
        assert_eq!(resp.status(), reqwest::StatusCode::ACCEPTED);

        let v: Value = http
            .post(format!("{base}/mcp"))
            .body("{oops")
            .send()
            .await?
            .json()
            .await?;
        assert_eq!(v["error"]["code"], -32700);

        gw_task.abort();
        apollo_task.abort();
        Ok(())
    }

    #[tokio::test]
    async fn stateless_rpc_tool_errors() -> anyhow::Result<()> {
        let (apollo_addr, _apollo, apollo_task) = start_mock_apollo().await?;
        let (_state, base, gw_task) = start_gateway(apollo_addr, None).await?;
        let http = reqwest::Client::new();

        let call = |id: i64, name: &str, args: Value| {
            serde_json::json!({
                "jsonrpc": "2.0",
                "id": id,
                "method": "tools/call",
                "params": { "name": name, "arguments": args }
            })
        };
        let v: Value = http
            .post(format!("{base}/mcp"))
            .header("x-api-key", "k")
            .json(&serde_json::json!([
                call(1, "delete_everything", serde_json::json!({})),
                call(2, "organization_job_postings", serde_json::json!({})),
                call(3, "organization_job_postings", serde_json::json!({ "organization_id": "broken" })),
                call(4, "get_person_email", serde_json::json!({ "apollo_id": "p-1" })),
                { "jsonrpc": "2.0", "id": 5, "method": "resources/list" },
            ]))
            .send()
            .await?
            .json()
            .await?;
        let out = v.as_array().expect("batch");
        assert_eq!(out.len(), 5);
        assert_eq!(out[0]["error"]["code"], -32601);
        assert_eq!(out[1]["error"]["code"], -32602);
        assert_eq!(out[2]["result"]["isError"], true);
        assert!(
            out[2]["result"]["content"][0]["text"]
                .as_str()
                .is_some_and(|t| t.starts_with("Apollo.io API error:"))
        );
        assert_eq!(out[3]["result"]["isError"], false);
        assert_eq!(out[4]["error"]["code"], -32601);

        gw_task.abort();
        apollo_task.abort();
        Ok(())
    }

    #[tokio::test]
    async fn stateless_rpc_call_without_credential_is_answered_per_entry() -> anyhow::Result<()> {
        let (apollo_addr, apollo, apollo_task) = start_mock_apollo().await?;
        let (_state, base, gw_task) = start_gateway(apollo_addr, None).await?;
        let http = reqwest::Client::new();

        let resp = http
            .post(format!("{base}/mcp"))
            .header("authorization", "Bearer")
            .json(&serde_json::json!([
                { "jsonrpc": "2.0", "id": 1, "method": "tools/list" },
                {
                    "jsonrpc": "2.0",
                    "id": 2,
                    "method": "tools/call",
                    "params": { "name": "get_person_email", "arguments": { "apollo_id": "p-1" } }
                },
            ]))
            .send()
            .await?;
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        let v: Value = resp.json().await?;
        let out = v.as_array().expect("batch");
        assert_eq!(out.len(), 2);
        assert!(out[0]["result"]["tools"].as_array().is_some_and(|t| !t.is_empty()));
        assert_eq!(out[1]["id"], 2);
        assert_eq!(out[1]["error"]["code"], -32000);
        let message = out[1]["error"]["message"].as_str().expect("message");
        for method in crate::credentials::ACCEPTED_CREDENTIAL_METHODS {
            assert!(message.contains(method), "{message}");
        }
        assert!(apollo.calls().is_empty());

        let resp = http
            .post(format!("{base}/api/people/search"))
            .header("authorization", "Bearer")
            .json(&serde_json::json!({}))
            .send()
            .await?;
        assert_eq!(resp.status(), reqwest::StatusCode::UNAUTHORIZED);
        let v: Value = resp.json().await?;
        assert_eq!(v["code"], "missing_credentials");

        gw_task.abort();
        apollo_task.abort();
        Ok(())
    }

    #[tokio::test]
    async fn sse_session_round_trip() -> anyhow::Result<()> {
        let (apollo_addr, apollo, apollo_task) = start_mock_apollo().await?;
        let (state, base, gw_task) = start_gateway(apollo_addr, None).await?;
        let http = reqwest::Client::new();

        let mut stream = http
            .get(format!("{base}/mcp"))
            .header("authorization", "ApiKey sse-key")
            .send()
            .await?;
        assert_eq!(stream.status(), reqwest::StatusCode::OK);

        let first = read_events(&mut stream, 1).await?;
        assert!(first[0].is("endpoint"));
        let endpoint = first[0].data.clone();
        assert!(endpoint.starts_with("/messages?sessionId="));

        let post = |body: Value| {
            http.post(format!("{base}{endpoint}"))
                .json(&body)
                .send()
        };
        let resp = post(serde_json::json!({
            "jsonrpc": "2.0", "id": 1, "method": "initialize",
            "params": { "protocolVersion": "2024-11-05", "capabilities": {}, "clientInfo": { "name": "t", "version": "1" } }
        }))
        .await?;
        assert_eq!(resp.status(), reqwest::StatusCode::ACCEPTED);
        post(serde_json::json!({ "jsonrpc": "2.0", "method": "notifications/initialized" })).await?;
        post(serde_json::json!({
            "jsonrpc": "2.0", "id": 2, "method": "tools/call",
            "params": { "name": "people_search", "arguments": { "q_keywords": "rust" } }
        }))
        .await?;

        let events = read_events(&mut stream, 2).await?;
        let init: Value = serde_json::from_str(&events[0].data)?;
        assert_eq!(init["result"]["serverInfo"]["name"], SERVER_NAME);
        assert_eq!(init["result"]["capabilities"]["tools"]["listChanged"], false);
        let call: Value = serde_json::from_str(&events[1].data)?;
        assert_eq!(call["id"], 2);
        assert_eq!(call["result"]["isError"], false);
        assert_eq!(apollo.calls()[0].1.as_deref(), Some("sse-key"));

        drop(stream);
        wait_for_sessions(&state, 0).await?;

        gw_task.abort();
        apollo_task.abort();
        Ok(())
    }

    #[tokio::test]
    async fn sse_messages_validate_session() -> anyhow::Result<()> {
        let (apollo_addr, _apollo, apollo_task) = start_mock_apollo().await?;
        let (_state, base, gw_task) = start_gateway(apollo_addr, None).await?;
        let http = reqwest::Client::new();

        let resp = http
            .post(format!("{base}/messages"))
            .json(&serde_json::json!({ "jsonrpc": "2.0", "id": 1, "method": "ping" }))
            .send()
            .await?;
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);

        let resp = http
            .post(format!("{base}/messages?sessionId=nope"))
            .json(&serde_json::json!({ "jsonrpc": "2.0", "id": 1, "method": "ping" }))
            .send()
            .await?;
        assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
        let v: Value = resp.json().await?;
        assert_eq!(v["code"], "session_not_found");

        gw_task.abort();
        apollo_task.abort();
        Ok(())
    }

    #[tokio::test]
    async fn shutdown_closes_open_streams() -> anyhow::Result<()> {
        let (apollo_addr, _apollo, apollo_task) = start_mock_apollo().await?;
        let (state, base, gw_task) = start_gateway(apollo_addr, None).await?;
        let http = reqwest::Client::new();

        let mut streams = Vec::new();
        for _ in 0..3 {
            let mut s = http
                .get(format!("{base}/sse"))
                .header("x-api-key", "k")
                .send()
                .await?;
            read_events(&mut s, 1).await?;
            streams.push(s);
        }
        assert_eq!(state.sessions.len(), 3);

        assert!(state.shutdown.trigger());
        assert!(state.sessions.is_empty());
        for mut s in streams {
            let drained = tokio::time::timeout(Duration::from_secs(5), async move {
                while let Ok(Some(_)) = s.chunk().await {}
            })
            .await;
            assert!(drained.is_ok(), "stream should end after shutdown");
        }
        tokio::time::timeout(Duration::from_secs(5), gw_task).await??;

        apollo_task.abort();
        Ok(())
    }
}
