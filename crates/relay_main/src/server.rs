use std::sync::Arc;

use anyhow::Result;
use relay_domain::{JsonRpcRequest, INTERNAL_ERROR, METHOD_NOT_FOUND, PARSE_ERROR};
use relay_services::Router;
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite};

use crate::OutgoingMessageSender;

/// MCP server over line-delimited JSON-RPC on stdio; every request is
/// delegated to the router.
pub struct RelayServer {
    router: Arc<Router>,
}

impl RelayServer {
    pub fn new(router: Arc<Router>) -> Self {
        Self { router }
    }

    /// Processes requests line by line until the reader closes.
    pub async fn run<R, W>(&self, reader: R, writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let sender = OutgoingMessageSender::new(writer);
        let mut lines = reader.lines();

        tracing::info!("Server ready, waiting for messages");

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            self.process_line(&line, &sender).await?;
        }

        tracing::info!("stdin closed, shutting down");
        Ok(())
    }

    async fn process_line<W>(&self, line: &str, sender: &OutgoingMessageSender<W>) -> Result<()>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let request: JsonRpcRequest = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(error) => {
                tracing::warn!(%error, "Discarding unparseable request line");
                return sender
                    .send_error(Value::Null, PARSE_ERROR, &format!("Parse error: {error}"))
                    .await;
            }
        };

        let id = request.id.clone();
        match request.method.as_str() {
            "initialize" => {
                let result = json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": {"tools": {}},
                    "serverInfo": {
                        "name": "notion-relay",
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                });
                self.reply(sender, id, Ok(result)).await
            }
            "notifications/initialized" | "notifications/cancelled" => Ok(()),
            "ping" => self.reply(sender, id, Ok(json!({}))).await,
            "tools/list" => {
                let tools: Vec<Value> = self
                    .router
                    .list_tools()
                    .await
                    .iter()
                    .map(|tool| tool.to_wire())
                    .collect();
                self.reply(sender, id, Ok(json!({"tools": tools}))).await
            }
            "tools/call" => {
                let params = request.params.unwrap_or_default();
                let Some(name) = params.get("name").and_then(Value::as_str) else {
                    return self
                        .reply(
                            sender,
                            id,
                            Err((INTERNAL_ERROR, "tools/call requires a tool name".to_string())),
                        )
                        .await;
                };
                let arguments = params
                    .get("arguments")
                    .cloned()
                    .unwrap_or_else(|| json!({}));

                let result = self.router.call_tool(name, arguments).await;
                self.reply(sender, id, Ok(result.to_wire())).await
            }
            other => {
                if request.is_notification() {
                    tracing::debug!(method = other, "Ignoring unknown notification");
                    return Ok(());
                }
                self.reply(
                    sender,
                    id,
                    Err((METHOD_NOT_FOUND, format!("Method not found: {other}"))),
                )
                .await
            }
        }
    }

    async fn reply<W>(
        &self,
        sender: &OutgoingMessageSender<W>,
        id: Option<Value>,
        outcome: std::result::Result<Value, (i64, String)>,
    ) -> Result<()>
    where
        W: AsyncWrite + Unpin + Send,
    {
        // Notifications never get an answer, whatever happened.
        let Some(id) = id else {
            return Ok(());
        };
        match outcome {
            Ok(result) => sender.send_response(id, result).await,
            Err((code, message)) => sender.send_error(id, code, &message).await,
        }
    }
}
