//! Hook message envelope shared by the glance daemon and its reporters.
//!
//! The reporter script posts one JSON object per hook invocation. The
//! envelope itself is strict (identity fields must be present), while the
//! nested `tool_input` map is decoded leniently: values that are not plain
//! scalars become [`ToolInputValue::Null`] instead of failing the message.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_MESSAGE_BYTES: usize = 64 * 1024; // 64KB
pub const HTTP_ACK_BODY: &str = r#"{"status":"ok"}"#;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("message body was empty")]
    Empty,

    #[error("message exceeded maximum size: {size} > {max} bytes")]
    TooLarge { size: usize, max: usize },

    #[error("message was not a valid hook envelope: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("{0} is required")]
    MissingField(&'static str),

    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u32),
}

impl DecodeError {
    /// Stable machine-readable code, used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            DecodeError::Empty => "empty_body",
            DecodeError::TooLarge { .. } => "message_too_large",
            DecodeError::InvalidJson(_) => "invalid_json",
            DecodeError::MissingField(_) => "missing_field",
            DecodeError::UnsupportedVersion(_) => "protocol_mismatch",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    PreToolUse,
    PostToolUse,
    Notification,
    Stop,
    /// Any hook the reporter forwards that the engine has no rule for.
    Other(String),
}

impl EventKind {
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::PreToolUse => "PreToolUse",
            EventKind::PostToolUse => "PostToolUse",
            EventKind::Notification => "Notification",
            EventKind::Stop => "Stop",
            EventKind::Other(name) => name.as_str(),
        }
    }
}

impl From<&str> for EventKind {
    fn from(value: &str) -> Self {
        match value {
            "PreToolUse" => EventKind::PreToolUse,
            "PostToolUse" => EventKind::PostToolUse,
            "Notification" => EventKind::Notification,
            "Stop" => EventKind::Stop,
            other => EventKind::Other(other.to_string()),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EventKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(EventKind::from(value.as_str()))
    }
}

/// A scalar from the open-ended `tool_input` map.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolInputValue {
    String(String),
    Int(i64),
    Double(f64),
    Bool(bool),
    Null,
}

impl ToolInputValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ToolInputValue::String(value) => Some(value.as_str()),
            _ => None,
        }
    }
}

impl From<Value> for ToolInputValue {
    fn from(value: Value) -> Self {
        match value {
            Value::String(value) => ToolInputValue::String(value),
            Value::Bool(value) => ToolInputValue::Bool(value),
            Value::Number(number) => {
                if let Some(int) = number.as_i64() {
                    ToolInputValue::Int(int)
                } else if let Some(double) = number.as_f64() {
                    ToolInputValue::Double(double)
                } else {
                    ToolInputValue::Null
                }
            }
            Value::Null | Value::Array(_) | Value::Object(_) => ToolInputValue::Null,
        }
    }
}

impl Serialize for ToolInputValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ToolInputValue::String(value) => serializer.serialize_str(value),
            ToolInputValue::Int(value) => serializer.serialize_i64(*value),
            ToolInputValue::Double(value) => serializer.serialize_f64(*value),
            ToolInputValue::Bool(value) => serializer.serialize_bool(*value),
            ToolInputValue::Null => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for ToolInputValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(ToolInputValue::from)
    }
}

pub type ToolInput = BTreeMap<String, ToolInputValue>;

/// Hook payload as produced by the agent, forwarded verbatim by the reporter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HookData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hook_event_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_tool_input",
        skip_serializing_if = "Option::is_none"
    )]
    pub tool_input: Option<ToolInput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_type: Option<String>,
}

impl HookData {
    /// Looks up a string-valued tool input field.
    pub fn input_str(&self, key: &str) -> Option<&str> {
        self.tool_input
            .as_ref()
            .and_then(|input| input.get(key))
            .and_then(ToolInputValue::as_str)
    }
}

// A non-object tool_input is treated as absent rather than rejecting the message.
fn lenient_tool_input<'de, D>(deserializer: D) -> Result<Option<ToolInput>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Object(map) => Some(
            map.into_iter()
                .map(|(key, value)| (key, ToolInputValue::from(value)))
                .collect(),
        ),
        _ => None,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
    pub session_id: String,
    pub terminal: String,
    pub project: String,
    pub cwd: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    pub event: EventKind,
    pub data: HookData,
}

impl HookMessage {
    pub fn new(session_id: &str, event: EventKind, data: HookData) -> Self {
        Self {
            version: Some(PROTOCOL_VERSION),
            session_id: session_id.to_string(),
            terminal: "Terminal".to_string(),
            project: String::new(),
            cwd: String::new(),
            timestamp: None,
            event,
            data,
        }
    }

    pub fn validate(&self) -> Result<(), DecodeError> {
        if let Some(version) = self.version {
            if version != PROTOCOL_VERSION {
                return Err(DecodeError::UnsupportedVersion(version));
            }
        }
        if self.session_id.trim().is_empty() {
            return Err(DecodeError::MissingField("session_id"));
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Decodes and validates one envelope from raw transport bytes.
pub fn decode_message(bytes: &[u8]) -> Result<HookMessage, DecodeError> {
    if bytes.len() > MAX_MESSAGE_BYTES {
        return Err(DecodeError::TooLarge {
            size: bytes.len(),
            max: MAX_MESSAGE_BYTES,
        });
    }
    if bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(DecodeError::Empty);
    }

    let message: HookMessage = serde_json::from_slice(bytes)?;
    message.validate()?;
    Ok(message)
}
