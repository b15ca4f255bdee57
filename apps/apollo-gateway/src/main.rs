use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context as _;
use apollo_client::{ApolloClientOptions, DEFAULT_APP_BASE_URL, DEFAULT_BASE_URL};
use clap::Parser;
use tracing::{error, info};

mod app;
mod credentials;
mod error;
mod lifecycle;
mod middleware;
mod rest;
mod rpc;
mod sessions;
mod sse;
mod stdio;
mod tools;

#[derive(Clone, Parser)]
#[command(
    name = "apollo-mcp-gateway",
    version,
    about = "MCP (stdio and SSE) and REST gateway for the Apollo.io API"
)]
struct Args {
    /// Apollo.io API key that overrides any per-request or default key.
    #[arg(long)]
    api_key: Option<String>,

    /// Process-wide fallback Apollo.io API key.
    #[arg(long, env = "APOLLO_IO_API_KEY")]
    default_api_key: Option<String>,

    /// Serve the HTTP surfaces (SSE, JSON-RPC, REST) on this address.
    #[arg(long, env = "APOLLO_GATEWAY_HTTP_ADDR")]
    http_addr: Option<SocketAddr>,

    /// Shorthand for `--http-addr 0.0.0.0:<port>`.
    #[arg(long, env = "PORT")]
    port: Option<u16>,

    /// Disable the stdio transport (HTTP only).
    #[arg(long, env = "APOLLO_GATEWAY_NO_STDIO", default_value_t = false)]
    no_stdio: bool,

    /// Require this bearer token on every HTTP route except health and tool discovery.
    #[arg(long, env = "APOLLO_GATEWAY_TOKEN")]
    server_token: Option<String>,

    #[arg(long, env = "APOLLO_BASE_URL", default_value = DEFAULT_BASE_URL)]
    apollo_base_url: String,

    /// Base URL for the email reveal endpoint.
    #[arg(long, env = "APOLLO_APP_BASE_URL", default_value = DEFAULT_APP_BASE_URL)]
    apollo_app_base_url: String,

    /// Outbound request timeout. Unset keeps the HTTP client's default.
    #[arg(long, env = "APOLLO_HTTP_TIMEOUT_SECS")]
    http_timeout_secs: Option<u64>,
}

#[tokio::main]
async fn main() {
    // stdout belongs to the stdio transport.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,hyper=warn,reqwest=warn".into()),
        )
        .json()
        .with_writer(std::io::stderr)
        .init();

    let code = match run(Args::parse()).await {
        Ok(()) => {
            info!("apollo gateway stopped");
            0
        }
        Err(e) => {
            error!(error = %format!("{e:#}"), "apollo gateway failed");
            1
        }
    };
    // A pending stdin read lives on a blocking thread that runtime teardown
    // would wait for; exit without tearing the runtime down.
    std::process::exit(code);
}

async fn run(args: Args) -> anyhow::Result<()> {
    let http_addr = args
        .http_addr
        .or_else(|| args.port.map(|p| SocketAddr::from(([0, 0, 0, 0], p))));
    if args.no_stdio && http_addr.is_none() {
        anyhow::bail!("--no-stdio requires --http-addr or --port");
    }

    let mut apollo = ApolloClientOptions::new(&args.apollo_base_url, &args.apollo_app_base_url)?;
    apollo.timeout = args.http_timeout_secs.map(Duration::from_secs);

    let state = app::AppState::new(app::GatewayOptions {
        api_key: args.api_key,
        default_api_key: args.default_api_key,
        server_token: args.server_token,
        apollo,
    })?;
    lifecycle::install_signal_handlers(state.shutdown.clone())?;

    let stdio_dispatcher = if args.no_stdio {
        None
    } else {
        let key = state.credentials.startup_key().context(
            "the stdio transport needs an Apollo.io API key: set APOLLO_IO_API_KEY or pass --api-key",
        )?;
        Some(state.dispatcher(Some(state.connector.client(key)?)))
    };

    let http_task = http_addr.map(|addr| {
        let st = state.clone();
        tokio::spawn(async move { app::serve(addr, st).await })
    });

    if let Some(dispatcher) = stdio_dispatcher {
        let shutdown = state.shutdown.clone();
        stdio::run_stdio(dispatcher, async move { shutdown.wait().await }).await?;
        if http_task.is_none() {
            state.shutdown.trigger();
        }
    }

    if let Some(t) = http_task {
        t.await.context("http task join")??;
    }
    Ok(())
}
