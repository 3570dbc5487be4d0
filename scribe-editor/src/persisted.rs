//! The record stored under the `"state"` key, and its validating reader.
//!
//! ```json
//! { "lastModified": 1700000000000, "files": [...], "config": {...},
//!   "path": "/notes/a.md", "markdownMode": false, "collab": {"room": "r"},
//!   "text": {"doc": ..., "selection": ...}, "ydocBytesBase64": "AQID" }
//! ```
//!
//! Reading checks the structure in a fixed order (JSON, config, persisted
//! text, state shape, each file) and reports the first failure with the
//! offending payload attached.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use scribe_core::snapshot::base64_bytes;
use scribe_core::{Config, DocumentSnapshot, EditorText, ServiceError, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Key the editor state lives under in the durable store.
pub const STATE_KEY: &str = "state";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedCollab {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<Timestamp>,
    pub files: Vec<DocumentSnapshot>,
    pub config: Config,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub markdown_mode: bool,
    pub collab: PersistedCollab,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<EditorText>,
    #[serde(skip_serializing_if = "Option::is_none", with = "base64_bytes")]
    pub ydoc_bytes_base64: Option<Vec<u8>>,
}

impl PersistedState {
    pub fn to_json(&self) -> Result<Vec<u8>, ServiceError> {
        serde_json::to_vec(self).map_err(ServiceError::exception)
    }

    /// Parse and validate a stored record. `defaults` is the config the
    /// stored one is merged over.
    pub fn from_json(bytes: &[u8], defaults: &Config) -> Result<Self, ServiceError> {
        let raw: Value = serde_json::from_slice(bytes).map_err(|_| {
            ServiceError::InvalidState(Value::String(String::from_utf8_lossy(bytes).into_owned()))
        })?;
        let Some(obj) = raw.as_object() else {
            return Err(ServiceError::InvalidState(raw));
        };

        let config = read_config(obj.get("config"), defaults)?;
        let text = read_text(obj.get("text"))?;
        check_state_shape(&raw, obj)?;

        let files = match obj.get("files") {
            Some(Value::Array(files)) => files
                .iter()
                .map(read_file)
                .collect::<Result<Vec<_>, _>>()?,
            _ => Vec::new(),
        };

        let last_modified = match obj.get("lastModified") {
            None | Some(Value::Null) => None,
            Some(value) => Some(
                serde_json::from_value::<Timestamp>(value.clone())
                    .map_err(|_| ServiceError::InvalidState(raw.clone()))?,
            ),
        };

        let path = match obj.get("path") {
            None | Some(Value::Null) => None,
            Some(Value::String(path)) => Some(path.clone()),
            Some(_) => return Err(ServiceError::InvalidState(raw)),
        };

        let ydoc_bytes_base64 = match obj.get("ydocBytesBase64") {
            None | Some(Value::Null) => None,
            Some(Value::String(encoded)) => Some(
                STANDARD
                    .decode(encoded)
                    .map_err(|_| ServiceError::InvalidState(raw.clone()))?,
            ),
            Some(_) => return Err(ServiceError::InvalidState(raw)),
        };

        Ok(Self {
            last_modified,
            files,
            config,
            path,
            markdown_mode: obj
                .get("markdownMode")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            collab: PersistedCollab {
                room: obj
                    .get("collab")
                    .and_then(|c| c.get("room"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
            },
            text,
            ydoc_bytes_base64,
        })
    }
}

// ─── Validation steps ───────────────────────────────────────────────

/// Stored config merged over `defaults`; `theme`, `codeTheme` and `font`
/// must be absent or strings.
fn read_config(stored: Option<&Value>, defaults: &Config) -> Result<Config, ServiceError> {
    let mut merged = match serde_json::to_value(defaults) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    };
    if let Some(Value::Object(stored)) = stored {
        for (key, value) in stored {
            merged.insert(key.clone(), value.clone());
        }
    }
    let merged = Value::Object(merged);

    let text_field_ok = |key: &str| matches!(merged.get(key), None | Some(Value::String(_)));
    if !["theme", "codeTheme", "font"].into_iter().all(text_field_ok) {
        return Err(ServiceError::InvalidConfig(merged));
    }
    serde_json::from_value(merged.clone()).map_err(|_| ServiceError::InvalidConfig(merged))
}

fn read_text(stored: Option<&Value>) -> Result<Option<EditorText>, ServiceError> {
    let Some(value) = stored.filter(|v| is_truthy(v)) else {
        return Ok(None);
    };
    if !EditorText::looks_like(value) {
        return Err(ServiceError::InvalidState(value.clone()));
    }
    serde_json::from_value(value.clone())
        .map(Some)
        .map_err(|_| ServiceError::InvalidState(value.clone()))
}

/// `files` is an array and `lastModified` is not a string.
fn check_state_shape(raw: &Value, obj: &Map<String, Value>) -> Result<(), ServiceError> {
    let files_ok = matches!(obj.get("files"), Some(Value::Array(_)));
    let last_modified_ok = !matches!(obj.get("lastModified"), Some(Value::String(_)));
    if files_ok && last_modified_ok {
        Ok(())
    } else {
        Err(ServiceError::InvalidState(raw.clone()))
    }
}

/// A file must carry content, a path or CRDT bytes.
fn read_file(value: &Value) -> Result<DocumentSnapshot, ServiceError> {
    let has_payload = ["content", "path", "crdtBytes"]
        .into_iter()
        .any(|key| value.get(key).is_some_and(is_truthy));
    if !has_payload {
        return Err(ServiceError::InvalidFile(value.clone()));
    }
    serde_json::from_value(value.clone()).map_err(|_| ServiceError::InvalidFile(value.clone()))
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
