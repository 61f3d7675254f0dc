//! Shared fixtures for service-level tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use relay_domain::{ToolDefinition, ToolName, ToolResult};
use serde_json::{json, Map, Value};

use crate::{
    BackendTransport, Clock, HttpClientError, HttpClientInfra, HttpResponse, LocalStoreInfra,
    TokenCacheInfra, TokenEviction, TransportFactory,
};

pub struct FixedClock(pub u64);

impl Clock for FixedClock {
    fn now_ms(&self) -> u64 {
        self.0
    }
}

/// HTTP stub that replays scripted outcomes and records every call.
pub struct StubHttp {
    responses: Mutex<Vec<Result<HttpResponse, HttpClientError>>>,
    pub calls: Mutex<Vec<(String, Map<String, Value>)>>,
}

impl StubHttp {
    pub fn new(responses: Vec<Result<HttpResponse, HttpClientError>>) -> Arc<Self> {
        Arc::new(StubHttp { responses: Mutex::new(responses), calls: Mutex::new(Vec::new()) })
    }

    pub fn ok(data: Value) -> Result<HttpResponse, HttpClientError> {
        Ok(HttpResponse { status: 200, data, headers: HashMap::new() })
    }

    pub fn not_found() -> Result<HttpResponse, HttpClientError> {
        Err(HttpClientError {
            message: "HTTP 404".to_string(),
            status: Some(404),
            data: json!({"code": "object_not_found"}),
            headers: HashMap::new(),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl HttpClientInfra for StubHttp {
    async fn execute(
        &self,
        operation: &relay_domain::OperationDescriptor,
        params: &Map<String, Value>,
    ) -> Result<HttpResponse, HttpClientError> {
        self.calls
            .lock()
            .unwrap()
            .push((operation.operation_id.clone(), params.clone()));
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            return Ok(HttpResponse {
                status: 200,
                data: json!({"default": true}),
                headers: HashMap::new(),
            });
        }
        responses.remove(0)
    }
}

/// Store stub with no rows; the fast-path treats it as an unreadable
/// database.
pub struct ClosedStore;

#[async_trait]
impl LocalStoreInfra for ClosedStore {
    async fn query(
        &self,
        _sql: &str,
        _params: Vec<String>,
    ) -> anyhow::Result<Vec<Map<String, Value>>> {
        Ok(Vec::new())
    }

    fn is_readable(&self) -> bool {
        false
    }
}

pub struct NoTokens;

impl TokenCacheInfra for NoTokens {
    fn evict_for_url(&self, _url: &str) -> anyhow::Result<TokenEviction> {
        Ok(TokenEviction::default())
    }

    fn has_usable_tokens(&self, _url: &str) -> bool {
        false
    }
}

type CallOutcome = Result<ToolResult, String>;

/// Transport factory whose transports expose a fixed tool list and replay
/// scripted call outcomes from a shared queue.
pub struct StubRemoteFactory {
    tools: Vec<ToolDefinition>,
    outcomes: Arc<Mutex<Vec<CallOutcome>>>,
    pub connects: AtomicUsize,
    pub calls: Arc<Mutex<Vec<(String, Value)>>>,
}

impl StubRemoteFactory {
    pub fn new(tool_names: &[&str], outcomes: Vec<CallOutcome>) -> Arc<Self> {
        Arc::new(StubRemoteFactory {
            tools: tool_names
                .iter()
                .map(|name| ToolDefinition::new(*name))
                .collect(),
            outcomes: Arc::new(Mutex::new(outcomes)),
            connects: AtomicUsize::new(0),
            calls: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl TransportFactory for StubRemoteFactory {
    async fn connect(&self) -> anyhow::Result<Box<dyn BackendTransport>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(StubRemoteTransport {
            tools: self.tools.clone(),
            outcomes: self.outcomes.clone(),
            calls: self.calls.clone(),
        }))
    }
}

pub struct StubRemoteTransport {
    tools: Vec<ToolDefinition>,
    outcomes: Arc<Mutex<Vec<CallOutcome>>>,
    calls: Arc<Mutex<Vec<(String, Value)>>>,
}

#[async_trait]
impl BackendTransport for StubRemoteTransport {
    async fn list_tools(&self) -> anyhow::Result<Vec<ToolDefinition>> {
        Ok(self.tools.clone())
    }

    async fn call_tool(&self, name: &ToolName, arguments: Value) -> anyhow::Result<ToolResult> {
        self.calls
            .lock()
            .unwrap()
            .push((name.as_str().to_string(), arguments));
        let mut outcomes = self.outcomes.lock().unwrap();
        if outcomes.is_empty() {
            return Ok(ToolResult::text(r#"{"from":"remote"}"#));
        }
        outcomes
            .remove(0)
            .map_err(|message| anyhow::anyhow!(message))
    }

    async fn close(&self) {}
}
