use anyhow::{Context, Result};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const PROTOCOL_SCHEMA_VERSION: u32 = 1;
/// Kept equal to `annex_index::DEFAULT_TOP_K`; this crate stays free of index types.
pub const DEFAULT_TOP_K: usize = 10;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CommandAction {
    Index,
    Search,
    Update,
    Delete,
    Get,
    Stats,
    Rebuild,
}

impl CommandAction {
    pub const fn as_str(self) -> &'static str {
        match self {
            CommandAction::Index => "index",
            CommandAction::Search => "search",
            CommandAction::Update => "update",
            CommandAction::Delete => "delete",
            CommandAction::Get => "get",
            CommandAction::Stats => "stats",
            CommandAction::Rebuild => "rebuild",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, JsonSchema)]
pub struct CommandRequest {
    pub action: CommandAction,
    #[serde(default = "empty_payload")]
    pub payload: Value,
}

fn empty_payload() -> Value {
    Value::Object(Map::default())
}

impl CommandRequest {
    pub fn new<T: Serialize>(action: CommandAction, payload: &T) -> Result<Self> {
        Ok(Self {
            action,
            payload: serde_json::to_value(payload)?,
        })
    }

    /// Decodes the payload into the typed struct for this action.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.payload.clone())
            .with_context(|| format!("invalid payload for action={}", self.action.as_str()))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Ok,
    Error,
}

#[derive(Debug, Serialize, Deserialize, Clone, JsonSchema)]
pub struct ErrorEnvelope {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, JsonSchema)]
pub struct ResponseMeta {
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<CommandAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, JsonSchema)]
pub struct CommandResponse {
    pub status: CommandStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorEnvelope>,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub meta: ResponseMeta,
}

impl CommandResponse {
    pub fn ok(action: CommandAction, data: Value) -> Self {
        Self {
            status: CommandStatus::Ok,
            error: None,
            data,
            meta: ResponseMeta {
                schema_version: PROTOCOL_SCHEMA_VERSION,
                action: Some(action),
                duration_ms: None,
            },
        }
    }

    pub fn error(action: Option<CommandAction>, error: ErrorEnvelope) -> Self {
        Self {
            status: CommandStatus::Error,
            error: Some(error),
            data: Value::Null,
            meta: ResponseMeta {
                schema_version: PROTOCOL_SCHEMA_VERSION,
                action,
                duration_ms: None,
            },
        }
    }

    #[must_use]
    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.meta.duration_ms = Some(duration_ms);
        self
    }

    pub fn is_ok(&self) -> bool {
        self.status == CommandStatus::Ok
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
pub struct WireDocument {
    pub id: String,
    pub vector: Vec<f32>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub payload: Map<String, Value>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
pub struct WireMatch {
    pub document: WireDocument,
    pub score: f32,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
pub struct WireQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub vector: Vec<f32>,
    #[serde(default)]
    pub matches: Vec<WireMatch>,
}

#[derive(Debug, Serialize, Deserialize, Clone, JsonSchema)]
pub struct IndexPayload {
    pub documents: Vec<WireDocument>,
}

#[derive(Debug, Serialize, Deserialize, Clone, JsonSchema)]
pub struct UpdatePayload {
    pub documents: Vec<WireDocument>,
}

#[derive(Debug, Serialize, Deserialize, Clone, JsonSchema)]
pub struct DeletePayload {
    pub ids: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, JsonSchema)]
pub struct GetPayload {
    pub id: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, JsonSchema)]
pub struct SearchPayload {
    pub queries: Vec<WireQuery>,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

const fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

#[derive(Debug, Serialize, Deserialize, Clone, JsonSchema)]
pub struct SearchOutput {
    pub queries: Vec<WireQuery>,
}

#[derive(Debug, Serialize, Deserialize, Clone, JsonSchema)]
pub struct GetOutput {
    pub document: WireDocument,
}

pub fn serialize_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn search_payload_defaults_top_k() {
        let request: CommandRequest = serde_json::from_value(json!({
            "action": "search",
            "payload": {"queries": [{"vector": [1.0, 0.0]}]}
        }))
        .unwrap();
        let payload: SearchPayload = request.payload().unwrap();
        assert_eq!(payload.top_k, DEFAULT_TOP_K);
        assert_eq!(payload.queries[0].vector, vec![1.0, 0.0]);
        assert!(payload.queries[0].matches.is_empty());
    }

    #[test]
    fn missing_payload_is_empty_object() {
        let request: CommandRequest = serde_json::from_str(r#"{"action":"stats"}"#).unwrap();
        assert_eq!(request.payload, json!({}));
        assert_eq!(request.action, CommandAction::Stats);
        assert!(request.payload::<GetPayload>().is_err());
    }

    #[test]
    fn error_response_shape() {
        let response = CommandResponse::error(
            Some(CommandAction::Delete),
            ErrorEnvelope {
                code: "not_found".to_string(),
                message: "missing".to_string(),
                details: None,
                hint: None,
            },
        )
        .with_duration_ms(3);
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["status"], "error");
        assert_eq!(value["error"]["code"], "not_found");
        assert_eq!(value["meta"]["action"], "delete");
        assert_eq!(value["meta"]["duration_ms"], 3);
        assert!(value["error"].get("hint").is_none());
    }
}
