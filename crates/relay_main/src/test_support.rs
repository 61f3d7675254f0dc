//! Stub infrastructure for server-level tests.

use async_trait::async_trait;
use relay_domain::OperationDescriptor;
use relay_services::{HttpClientError, HttpClientInfra, HttpResponse, LocalStoreInfra};
use serde_json::{Map, Value};

/// Store stub behaving like an absent desktop-app database.
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

/// HTTP stub for tests that must not reach the network.
pub struct UnreachableHttp;

#[async_trait]
impl HttpClientInfra for UnreachableHttp {
    async fn execute(
        &self,
        operation: &OperationDescriptor,
        _params: &Map<String, Value>,
    ) -> Result<HttpResponse, HttpClientError> {
        Err(HttpClientError {
            message: format!("{} must not reach the network in this test", operation.operation_id),
            status: None,
            data: Value::Null,
            headers: Default::default(),
        })
    }
}
