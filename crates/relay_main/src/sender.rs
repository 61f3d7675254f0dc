use std::sync::Arc;

use anyhow::Result;
use relay_domain::JsonRpcResponse;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

/// Serialized writer for outgoing JSON-RPC messages. Stdout carries protocol
/// bytes only, one message per line.
pub struct OutgoingMessageSender<W: AsyncWrite + Unpin + Send> {
    writer: Arc<Mutex<W>>,
}

impl<W: AsyncWrite + Unpin + Send> Clone for OutgoingMessageSender<W> {
    fn clone(&self) -> Self {
        Self { writer: self.writer.clone() }
    }
}

impl<W: AsyncWrite + Unpin + Send> OutgoingMessageSender<W> {
    pub fn new(writer: W) -> Self {
        Self { writer: Arc::new(Mutex::new(writer)) }
    }

    pub async fn send_response(&self, id: Value, result: Value) -> Result<()> {
        self.write_message(&JsonRpcResponse::success(id, result))
            .await
    }

    pub async fn send_error(&self, id: Value, code: i64, message: &str) -> Result<()> {
        self.write_message(&JsonRpcResponse::failure(id, code, message))
            .await
    }

    async fn write_message(&self, message: &impl Serialize) -> Result<()> {
        let json = serde_json::to_string(message)?;
        let mut writer = self.writer.lock().await;

        tracing::debug!("Sending message: {json}");

        writer.write_all(json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok(())
    }
}
