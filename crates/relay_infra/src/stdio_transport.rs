use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use relay_domain::{
    JsonRpcMessage, JsonRpcRequest, JsonRpcResponse, RemoteBackendSettings, ToolDefinition,
    ToolName, ToolResult,
};
use relay_services::{BackendTransport, TransportFactory};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time;
use tracing::{debug, warn};

const CHANNEL_CAPACITY: usize = 128;

/// Per-request ceiling for protocol RPCs (initialize, tools/list). Tool
/// calls run without one; the supervisor owns those deadlines.
const PROTOCOL_RPC_TIMEOUT: Duration = Duration::from_secs(25);

type PendingSender = oneshot::Sender<JsonRpcResponse>;

/// Builds stdio transports from an immutable launch spec, so every
/// reconnect reproduces the original child process.
pub struct StdioTransportFactory {
    settings: RemoteBackendSettings,
}

impl StdioTransportFactory {
    pub fn new(settings: RemoteBackendSettings) -> Self {
        StdioTransportFactory { settings }
    }
}

#[async_trait]
impl TransportFactory for StdioTransportFactory {
    async fn connect(&self) -> anyhow::Result<Box<dyn BackendTransport>> {
        let command = self
            .settings
            .command
            .as_deref()
            .ok_or_else(|| anyhow!("No launch command configured for the remote backend"))?;

        let transport = StdioTransport::spawn(
            command,
            &self.settings.args,
            &self.settings.env,
            self.settings.cwd.as_deref(),
        )?;
        transport.initialize().await?;
        Ok(Box::new(transport))
    }
}

/// Line-delimited JSON-RPC 2.0 client over a child process's stdio.
///
/// A writer task drains an outgoing channel into the child's stdin; a reader
/// task parses stdout lines and completes pending requests by id. The child
/// inherits this process's stderr so OAuth prompts stay visible.
pub struct StdioTransport {
    child: Mutex<tokio::process::Child>,
    outgoing_tx: mpsc::Sender<JsonRpcRequest>,
    pending: Arc<Mutex<HashMap<i64, PendingSender>>>,
    id_counter: AtomicI64,
}

impl StdioTransport {
    fn spawn(
        program: &str,
        args: &[String],
        extra_env: &HashMap<String, String>,
        cwd: Option<&std::path::Path>,
    ) -> anyhow::Result<Self> {
        let mut command = Command::new(program);
        command
            .args(args)
            .env_clear()
            .envs(subprocess_env(extra_env))
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::inherit())
            .kill_on_drop(true);
        if let Some(cwd) = cwd {
            command.current_dir(cwd);
        }

        let mut child = command.spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("Failed to capture child stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("Failed to capture child stdout"))?;

        let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<JsonRpcRequest>(CHANNEL_CAPACITY);
        let pending: Arc<Mutex<HashMap<i64, PendingSender>>> = Arc::new(Mutex::new(HashMap::new()));

        {
            let mut stdin = stdin;
            tokio::spawn(async move {
                while let Some(message) = outgoing_rx.recv().await {
                    let Ok(line) = serde_json::to_string(&message) else {
                        continue;
                    };
                    if stdin.write_all(line.as_bytes()).await.is_err() {
                        break;
                    }
                    if stdin.write_all(b"\n").await.is_err() {
                        break;
                    }
                    if stdin.flush().await.is_err() {
                        break;
                    }
                }
            });
        }

        {
            let pending = pending.clone();
            let mut lines = BufReader::new(stdout).lines();
            tokio::spawn(async move {
                while let Ok(Some(line)) = lines.next_line().await {
                    match serde_json::from_str::<JsonRpcMessage>(&line) {
                        Ok(JsonRpcMessage::Response(response)) => {
                            let Some(id) = response.numeric_id() else {
                                continue;
                            };
                            if let Some(sender) = pending.lock().await.remove(&id) {
                                let _ = sender.send(response);
                            }
                        }
                        // Server-initiated requests and notifications are
                        // not part of the routed surface.
                        Ok(JsonRpcMessage::Request(request)) => {
                            debug!(method = %request.method, "Ignoring server-initiated message");
                        }
                        Err(error) => {
                            debug!(%error, "Ignoring unparseable line from the child");
                        }
                    }
                }
            });
        }

        Ok(StdioTransport {
            child: Mutex::new(child),
            outgoing_tx,
            pending,
            id_counter: AtomicI64::new(1),
        })
    }

    async fn initialize(&self) -> anyhow::Result<()> {
        self.send_request(
            "initialize",
            Some(json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "clientInfo": {
                    "name": "notion-relay",
                    "version": env!("CARGO_PKG_VERSION"),
                },
            })),
            Some(PROTOCOL_RPC_TIMEOUT),
        )
        .await?;

        self.outgoing_tx
            .send(JsonRpcRequest::notification(
                "notifications/initialized",
                None,
            ))
            .await
            .map_err(|_| anyhow!("Writer task is gone; cannot finish the handshake"))?;
        Ok(())
    }

    async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> anyhow::Result<Value> {
        let id = self.id_counter.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest::new(id, method, params);

        let (sender, receiver) = oneshot::channel();
        self.pending.lock().await.insert(id, sender);

        if self.outgoing_tx.send(request).await.is_err() {
            self.pending.lock().await.remove(&id);
            return Err(anyhow!("Failed to send {method}: the writer task is gone"));
        }

        let response = match timeout {
            Some(deadline) => match time::timeout(deadline, receiver).await {
                Ok(Ok(response)) => response,
                Ok(Err(_)) => {
                    self.pending.lock().await.remove(&id);
                    return Err(anyhow!("Connection closed before {method} was answered"));
                }
                Err(_) => {
                    self.pending.lock().await.remove(&id);
                    return Err(anyhow!(
                        "{method} timed out after {}s",
                        deadline.as_secs()
                    ));
                }
            },
            None => receiver
                .await
                .map_err(|_| anyhow!("Connection closed before {method} was answered"))?,
        };

        if let Some(error) = response.error {
            return Err(anyhow!(
                "Server returned JSON-RPC error for {method}: code = {}, message = {}",
                error.code,
                error.message
            ));
        }
        response
            .result
            .ok_or_else(|| anyhow!("Response to {method} carried neither result nor error"))
    }
}

#[async_trait]
impl BackendTransport for StdioTransport {
    async fn list_tools(&self) -> anyhow::Result<Vec<ToolDefinition>> {
        let result = self
            .send_request("tools/list", None, Some(PROTOCOL_RPC_TIMEOUT))
            .await?;

        let entries = result
            .get("tools")
            .and_then(Value::as_array)
            .ok_or_else(|| anyhow!("tools/list result carried no tools array"))?;

        let mut tools = Vec::with_capacity(entries.len());
        for entry in entries {
            match ToolDefinition::from_wire(entry) {
                Some(tool) => tools.push(tool),
                None => warn!("Skipping tool entry without a usable name"),
            }
        }
        Ok(tools)
    }

    async fn call_tool(&self, name: &ToolName, arguments: Value) -> anyhow::Result<ToolResult> {
        let result = self
            .send_request(
                "tools/call",
                Some(json!({"name": name.as_str(), "arguments": arguments})),
                None,
            )
            .await?;

        let mut content = Vec::new();
        for item in result
            .get("content")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            match item.get("type").and_then(Value::as_str) {
                Some("text") => {
                    let text = item
                        .get("text")
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    content.push(relay_domain::ToolContent::text(text));
                }
                other => {
                    warn!(tool = %name, kind = ?other, "Dropping unsupported content item");
                }
            }
        }

        let is_error = result
            .get("isError")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        Ok(ToolResult { content, is_error })
    }

    async fn close(&self) {
        let mut child = self.child.lock().await;
        if let Err(error) = child.start_kill() {
            debug!(%error, "Child was already gone on close");
        }
    }
}

/// Environment for the child: a fixed allowlist of well-known keys from the
/// parent (path, locale, proxy and TLS material) plus caller-supplied
/// extras. Everything else is withheld.
fn subprocess_env(extra_env: &HashMap<String, String>) -> HashMap<String, String> {
    DEFAULT_ENV_VARS
        .iter()
        .filter_map(|key| std::env::var(key).ok().map(|value| (key.to_string(), value)))
        .chain(
            extra_env
                .iter()
                .map(|(key, value)| (key.clone(), value.clone())),
        )
        .collect()
}

#[rustfmt::skip]
#[cfg(unix)]
const DEFAULT_ENV_VARS: &[&str] = &[
    "HOME",
    "LANG",
    "LC_ALL",
    "LOGNAME",
    "PATH",
    "SHELL",
    "TERM",
    "TMPDIR",
    "TZ",
    "USER",
    "HTTP_PROXY",
    "HTTPS_PROXY",
    "NO_PROXY",
    "http_proxy",
    "https_proxy",
    "no_proxy",
    "SSL_CERT_FILE",
    "SSL_CERT_DIR",
    "NODE_EXTRA_CA_CERTS",
];

#[cfg(windows)]
const DEFAULT_ENV_VARS: &[&str] = &[
    "PATH",
    "PATHEXT",
    "TEMP",
    "TMP",
    "USERDOMAIN",
    "USERNAME",
    "USERPROFILE",
    "HTTP_PROXY",
    "HTTPS_PROXY",
    "NO_PROXY",
    "SSL_CERT_FILE",
    "SSL_CERT_DIR",
    "NODE_EXTRA_CA_CERTS",
];

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_subprocess_env_is_allowlisted() {
        std::env::set_var("RELAY_TEST_SECRET", "do-not-leak");

        let actual = subprocess_env(&HashMap::new());

        assert_eq!(actual.contains_key("RELAY_TEST_SECRET"), false);
        std::env::remove_var("RELAY_TEST_SECRET");
    }

    #[test]
    fn test_subprocess_env_includes_extras() {
        let extras = HashMap::from([("MCP_REMOTE_CONFIG_DIR".to_string(), "/tmp/auth".to_string())]);

        let actual = subprocess_env(&extras);

        assert_eq!(
            actual.get("MCP_REMOTE_CONFIG_DIR").map(String::as_str),
            Some("/tmp/auth")
        );
    }

    #[tokio::test]
    async fn test_round_trip_against_scripted_child() {
        // A tiny MCP server written in shell: answers initialize, tools/list
        // and one tools/call, line by line.
        let script = r#"
while IFS= read -r line; do
  case "$line" in
    *'"initialize"'*)
      printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{"capabilities":{}}}' ;;
    *'"tools/list"'*)
      printf '%s\n' '{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"retrieve-a-page","description":"","inputSchema":{"type":"object"}}]}}' ;;
    *'"tools/call"'*)
      printf '%s\n' '{"jsonrpc":"2.0","id":3,"result":{"content":[{"type":"text","text":"{\"object\":\"page\"}"}],"isError":false}}' ;;
  esac
done
"#;
        let settings = RemoteBackendSettings::default()
            .command("sh")
            .args(vec!["-c".to_string(), script.to_string()]);
        let factory = StdioTransportFactory::new(settings);

        let transport = factory.connect().await.unwrap();

        let tools = transport.list_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name.as_str(), "retrieve-a-page");

        let result = transport
            .call_tool(&ToolName::new("retrieve-a-page"), json!({"page_id": "x"}))
            .await
            .unwrap();
        assert_eq!(result.is_error, false);
        assert_eq!(result.single_text(), Some(r#"{"object":"page"}"#));

        transport.close().await;
    }
}
