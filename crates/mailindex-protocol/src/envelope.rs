use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A decoded request envelope. `id` is kept as raw JSON so it can be echoed verbatim.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RpcRequest {
    pub id: Value,
    pub method: String,
    #[serde(default = "empty_params", deserialize_with = "params_or_empty")]
    pub params: Value,
}

impl RpcRequest {
    pub fn new(id: impl Into<Value>, method: &str, params: Value) -> Self {
        Self {
            id: id.into(),
            method: method.to_string(),
            params,
        }
    }

    /// Id rendered for log lines.
    pub fn id_label(&self) -> String {
        match &self.id {
            Value::String(id) => id.clone(),
            other => other.to_string(),
        }
    }
}

fn empty_params() -> Value {
    Value::Object(Map::new())
}

fn params_or_empty<'de, D>(deserializer: D) -> Result<Value, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(match raw {
        None | Some(Value::Null) => empty_params(),
        Some(value) => value,
    })
}

/// A response envelope; serializes to exactly `{id, result}` or `{id, error}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RpcResponse {
    Ok { id: Value, result: Value },
    Error { id: Value, error: String },
}

impl RpcResponse {
    pub fn ok(id: Value, result: Value) -> Self {
        Self::Ok { id, result }
    }

    pub fn error(id: Value, message: impl Into<String>) -> Self {
        Self::Error {
            id,
            error: message.into(),
        }
    }

    pub fn id(&self) -> &Value {
        match self {
            Self::Ok { id, .. } | Self::Error { id, .. } => id,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    pub fn result(&self) -> Option<&Value> {
        match self {
            Self::Ok { result, .. } => Some(result),
            Self::Error { .. } => None,
        }
    }
}

/// A payload that could not be decoded into a request.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeFailure {
    pub id: Value,
    pub message: String,
}

impl DecodeFailure {
    pub fn into_response(self) -> RpcResponse {
        RpcResponse::error(self.id, self.message)
    }
}

pub fn decode_request(payload: &[u8]) -> Result<RpcRequest, DecodeFailure> {
    serde_json::from_slice::<RpcRequest>(payload).map_err(|error| DecodeFailure {
        id: best_effort_request_id(payload).unwrap_or_else(|| Value::String(String::new())),
        message: format!("Invalid request envelope: {error}"),
    })
}

/// Recovers the `id` of a payload that parsed as JSON but not as a request.
pub fn best_effort_request_id(payload: &[u8]) -> Option<Value> {
    let value = serde_json::from_slice::<Value>(payload).ok()?;
    match value.get("id")? {
        id @ (Value::String(_) | Value::Number(_)) => Some(id.clone()),
        _ => None,
    }
}
