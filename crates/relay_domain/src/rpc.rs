use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INTERNAL_ERROR: i64 = -32603;

/// JSON-RPC 2.0 request structure. Ids are kept as raw JSON: clients are free
/// to use numbers or strings and the server echoes whatever it received.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: i64, method: impl ToString, params: Option<Value>) -> Self {
        JsonRpcRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(Value::from(id)),
            method: method.to_string(),
            params,
        }
    }

    /// A request without an id; receivers must not answer it.
    pub fn notification(method: impl ToString, params: Option<Value>) -> Self {
        JsonRpcRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: None,
            method: method.to_string(),
            params,
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// JSON-RPC 2.0 response structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        JsonRpcResponse {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, code: i64, message: impl ToString) -> Self {
        JsonRpcResponse {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.to_string(),
                data: None,
            }),
        }
    }

    /// Numeric id, when the peer used one. Responses to string ids are not
    /// correlated by the subprocess client and are dropped there.
    pub fn numeric_id(&self) -> Option<i64> {
        self.id.as_i64()
    }
}

/// JSON-RPC 2.0 error structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Any message a peer can put on the wire. Requests are tried first because
/// they are the only variant carrying `method`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    Request(JsonRpcRequest),
    Response(JsonRpcResponse),
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_request_round_trip() {
        let fixture = JsonRpcRequest::new(7, "tools/list", None);

        let json = serde_json::to_string(&fixture).unwrap();
        let actual: JsonRpcRequest = serde_json::from_str(&json).unwrap();

        assert_eq!(actual.method, "tools/list");
        assert_eq!(actual.id, Some(json!(7)));
        assert_eq!(actual.is_notification(), false);
    }

    #[test]
    fn test_notification_omits_id() {
        let fixture = JsonRpcRequest::notification("notifications/initialized", None);

        let actual = serde_json::to_string(&fixture).unwrap();

        assert_eq!(actual.contains("\"id\""), false);
    }

    #[test]
    fn test_message_discriminates_response() {
        let line = r#"{"jsonrpc":"2.0","id":3,"result":{"ok":true}}"#;

        let actual: JsonRpcMessage = serde_json::from_str(line).unwrap();

        match actual {
            JsonRpcMessage::Response(response) => {
                assert_eq!(response.numeric_id(), Some(3));
                assert_eq!(response.result, Some(json!({"ok": true})));
            }
            JsonRpcMessage::Request(_) => panic!("expected a response"),
        }
    }

    #[test]
    fn test_message_discriminates_request() {
        let line = r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#;

        let actual: JsonRpcMessage = serde_json::from_str(line).unwrap();

        match actual {
            JsonRpcMessage::Request(request) => assert_eq!(request.method, "ping"),
            JsonRpcMessage::Response(_) => panic!("expected a request"),
        }
    }

    #[test]
    fn test_failure_shape() {
        let fixture = JsonRpcResponse::failure(json!(9), METHOD_NOT_FOUND, "no such method");

        let actual = serde_json::to_value(&fixture).unwrap();

        assert_eq!(actual["error"]["code"], -32601);
        assert_eq!(actual["error"]["message"], "no such method");
        assert_eq!(actual.get("result"), None);
    }
}
