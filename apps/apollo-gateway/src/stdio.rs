use std::future::Future;

use apollo_mcp::{JsonRpcResponse, McpConnection, McpDispatcher, RpcReply};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt as _, AsyncWrite, AsyncWriteExt as _, BufReader};
use tracing::{error, info};

/// Serve newline-delimited JSON-RPC on stdin/stdout until EOF or `shutdown` resolves.
pub async fn run_stdio(
    dispatcher: McpDispatcher,
    shutdown: impl Future<Output = ()>,
) -> anyhow::Result<()> {
    let reader = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    info!("stdio transport ready");
    serve_lines(McpConnection::new(dispatcher), reader, &mut stdout, shutdown).await?;
    info!("stdio transport closed");
    Ok(())
}

async fn serve_lines<R, W>(
    mut conn: McpConnection,
    reader: R,
    writer: &mut W,
    shutdown: impl Future<Output = ()>,
) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    tokio::pin!(shutdown);

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = &mut shutdown => break,
        };
        let Some(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }

        if let Some(out) = handle_line(&mut conn, &line).await {
            writer.write_all(out.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
        }
    }
    Ok(())
}

async fn handle_line(conn: &mut McpConnection, line: &str) -> Option<String> {
    let out = match serde_json::from_str::<Value>(line) {
        Ok(val) => match conn.handle_payload(val).await {
            RpcReply::Single(resp) => serde_json::to_string(&resp),
            RpcReply::Batch(resps) => serde_json::to_string(&resps),
            RpcReply::Nothing => return None,
        },
        Err(e) => serde_json::to_string(&JsonRpcResponse::parse_error(e.to_string())),
    };
    match out {
        Ok(s) => Some(s),
        Err(e) => {
            error!(error = %e, "serialize json-rpc response");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use apollo_mcp::McpServerConfig;

    use super::*;
    use crate::tools::{ApolloToolHandler, ToolRegistry};

    async fn run_script(input: &str) -> anyhow::Result<Vec<Value>> {
        let handler = Arc::new(ApolloToolHandler::new(Arc::new(ToolRegistry::new()?), None));
        let dispatcher =
            McpDispatcher::new(McpServerConfig::default_for_binary("test", "0.0.0"), handler);
        let mut out = Vec::new();
        serve_lines(
            McpConnection::new(dispatcher),
            input.as_bytes(),
            &mut out,
            std::future::pending(),
        )
        .await?;
        String::from_utf8(out)?
            .lines()
            .map(|l| Ok(serde_json::from_str(l)?))
            .collect()
    }

    #[tokio::test]
    async fn lifecycle_then_tools_list() -> anyhow::Result<()> {
        let script = [
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2024-11-05","capabilities":{},"clientInfo":{"name":"t","version":"1"}}}"#,
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            "",
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#,
        ]
        .join("\n");
        let out = run_script(&script).await?;
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["result"]["protocolVersion"], "2024-11-05");
        assert_eq!(out[1]["id"], 2);
        assert_eq!(out[1]["result"]["tools"].as_array().map(Vec::len), Some(7));
        Ok(())
    }

    #[tokio::test]
    async fn parse_errors_and_invalid_envelopes() -> anyhow::Result<()> {
        let script = ["{not json", r#"{"jsonrpc":"2.0","id":9}"#].join("\n");
        let out = run_script(&script).await?;
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["error"]["code"], -32700);
        assert!(out[0]["id"].is_null());
        assert_eq!(out[1]["error"]["code"], -32600);
        assert_eq!(out[1]["id"], 9);
        Ok(())
    }

    #[tokio::test]
    async fn batch_is_one_line_and_notification_only_batch_is_silent() -> anyhow::Result<()> {
        let script = [
            r#"[{"jsonrpc":"2.0","id":"a","method":"ping"},{"jsonrpc":"2.0","method":"notifications/cancelled"},{"jsonrpc":"2.0","id":"b","method":"ping"}]"#,
            r#"[{"jsonrpc":"2.0","method":"notifications/cancelled"}]"#,
            "[]",
        ]
        .join("\n");
        let out = run_script(&script).await?;
        assert_eq!(out.len(), 1);
        let batch = out[0].as_array().expect("array");
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0]["id"], "a");
        assert_eq!(batch[1]["id"], "b");
        Ok(())
    }
}
