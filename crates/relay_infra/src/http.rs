use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use relay_domain::{ApiSettings, HttpMethod, OperationDescriptor};
use relay_services::{HttpClientError, HttpClientInfra, HttpResponse};
use serde_json::{Map, Value};
use tracing::debug;

/// Upstream HTTP API client over reqwest.
///
/// Path parameters are substituted from same-named arguments; on GET and
/// DELETE the remaining scalars travel as query parameters, on mutating
/// methods the remainder becomes the JSON body.
pub struct ApiHttpClient {
    client: reqwest::Client,
    base_url: String,
    authorization: Option<String>,
    version: String,
}

impl ApiHttpClient {
    pub fn new(api: &ApiSettings) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(ApiHttpClient {
            client,
            base_url: api.base_url.trim_end_matches('/').to_string(),
            authorization: api.authorization(),
            version: api.version.clone(),
        })
    }
}

#[async_trait]
impl HttpClientInfra for ApiHttpClient {
    async fn execute(
        &self,
        operation: &OperationDescriptor,
        params: &Map<String, Value>,
    ) -> Result<HttpResponse, HttpClientError> {
        let mut remaining = params.clone();
        let path = fill_path(&operation.path, &mut remaining).map_err(|message| {
            HttpClientError {
                message,
                status: None,
                data: Value::Null,
                headers: HashMap::new(),
            }
        })?;

        let url = format!("{}{path}", self.base_url);
        let method = match operation.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };

        let mut request = self
            .client
            .request(method, url.as_str())
            .header("Notion-Version", self.version.as_str());
        if let Some(authorization) = &self.authorization {
            request = request.header(reqwest::header::AUTHORIZATION, authorization.as_str());
        }

        request = match operation.method {
            HttpMethod::Get | HttpMethod::Delete => {
                let query: Vec<(String, String)> = remaining
                    .iter()
                    .map(|(key, value)| (key.clone(), query_value(value)))
                    .collect();
                request.query(&query)
            }
            _ => request.json(&Value::Object(remaining)),
        };

        debug!(operation = %operation.operation_id, %url, "Issuing upstream API request");

        let response = request.send().await.map_err(|error| HttpClientError {
            message: format!("Request to {url} failed: {error}"),
            status: None,
            data: Value::Null,
            headers: HashMap::new(),
        })?;

        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.to_string(), value.to_string()))
            })
            .collect::<HashMap<_, _>>();
        let body = response.text().await.unwrap_or_default();
        let data: Value = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&body).unwrap_or(Value::String(body))
        };

        if status.is_success() {
            Ok(HttpResponse { status: status.as_u16(), data, headers })
        } else {
            Err(HttpClientError {
                message: format!("HTTP {} from {url}", status.as_u16()),
                status: Some(status.as_u16()),
                data,
                headers,
            })
        }
    }
}

/// Substitutes `{name}` segments from same-named parameters, consuming them.
fn fill_path(template: &str, params: &mut Map<String, Value>) -> Result<String, String> {
    let mut path = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        path.push_str(&rest[..open]);
        let Some(close) = rest[open..].find('}') else {
            return Err(format!("Unbalanced path template: {template}"));
        };
        let name = &rest[open + 1..open + close];
        let value = params
            .remove(name)
            .ok_or_else(|| format!("Missing required path parameter: {name}"))?;
        let segment = match value {
            Value::String(text) => text,
            other => other.to_string(),
        };
        path.push_str(&urlencode(&segment));
        rest = &rest[open + close + 1..];
    }
    path.push_str(rest);
    Ok(path)
}

fn query_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn urlencode(segment: &str) -> String {
    let mut encoded = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char)
            }
            other => encoded.push_str(&format!("%{other:02X}")),
        }
    }
    encoded
}
