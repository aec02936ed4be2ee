//! Core types for the join pipeline (event model + CLI output contract).

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::JoinError;

// ---------------------------------------------------------------------------
// Field names shared by sources, rules and identity
// ---------------------------------------------------------------------------

pub mod field {
  pub const TYPE: &str = "type";
  pub const SUB_TYPE: &str = "subType";
  pub const DELIVERY_TYPE: &str = "deliveryType";
  pub const DEVICE_ID: &str = "deviceId";
  pub const DEVICE_TIME: &str = "deviceTime";
  pub const TIME: &str = "time";
  pub const SOURCE: &str = "source";
  pub const VALUE: &str = "value";
  pub const UNITS: &str = "units";
  pub const JOIN_KEY: &str = "joinKey";
  pub const ANNOTATIONS: &str = "annotations";
  pub const DURATION: &str = "duration";
  pub const ID: &str = "_id";
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// One normalized device event: an open map of named fields with a `type`.
///
/// Events move through the pipeline by value. Rules never edit an event in
/// place once it has been handed over; they build the replacement with
/// [`Event::with`] / [`Event::without`] and emit that instead.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Event(Map<String, Value>);

impl Event {
  pub fn new(kind: &str) -> Self {
    let mut map = Map::new();
    map.insert(field::TYPE.to_string(), Value::String(kind.to_string()));
    Self(map)
  }

  /// The `type` discriminant, or `""` when the source left it out.
  pub fn kind(&self) -> &str {
    self.str_field(field::TYPE).unwrap_or_default()
  }

  pub fn is(&self, kind: &str) -> bool {
    self.kind() == kind
  }

  pub fn get(&self, name: &str) -> Option<&Value> {
    self.0.get(name).filter(|v| !v.is_null())
  }

  pub fn has(&self, name: &str) -> bool {
    self.get(name).is_some()
  }

  pub fn str_field(&self, name: &str) -> Option<&str> {
    self.get(name).and_then(Value::as_str)
  }

  pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
    self.0.insert(name.to_string(), value.into());
    self
  }

  pub fn without(mut self, name: &str) -> Self {
    self.0.remove(name);
    self
  }

  /// UTC `time`, if present. A `time` that is not RFC 3339 is an error.
  pub fn time(&self) -> Result<Option<DateTime<Utc>>, JoinError> {
    match self.get(field::TIME) {
      None => Ok(None),
      Some(Value::String(s)) => DateTime::parse_from_rfc3339(s)
        .map(|t| Some(t.with_timezone(&Utc)))
        .map_err(|e| JoinError::invalid(field::TIME, &format!("invalid RFC3339: {}", e))),
      Some(other) => Err(JoinError::invalid(
        field::TIME,
        &format!("expected string, got {}", other),
      )),
    }
  }

  pub fn require_time(&self) -> Result<DateTime<Utc>, JoinError> {
    self
      .time()?
      .ok_or_else(|| JoinError::missing(self.kind(), field::TIME))
  }

  /// Append `{code}` to the `annotations` array.
  pub fn annotate(mut self, code: &str) -> Self {
    let mut note = Map::new();
    note.insert("code".to_string(), Value::String(code.to_string()));
    let notes = self
      .0
      .entry(field::ANNOTATIONS)
      .or_insert_with(|| Value::Array(Vec::new()));
    if !notes.is_array() {
      *notes = Value::Array(Vec::new());
    }
    if let Value::Array(list) = notes {
      list.push(Value::Object(note));
    }
    self
  }

  pub fn has_annotation(&self, code: &str) -> bool {
    match self.get(field::ANNOTATIONS) {
      Some(Value::Array(notes)) => notes
        .iter()
        .any(|n| n.get("code").and_then(Value::as_str) == Some(code)),
      _ => false,
    }
  }

  /// True when both events carry the same `joinKey` and `deviceId`.
  pub fn shares_join_key(&self, other: &Event) -> bool {
    let key = match self.get(field::JOIN_KEY) {
      Some(k) => k,
      None => return false,
    };
    other.get(field::JOIN_KEY) == Some(key)
      && self.get(field::DEVICE_ID) == other.get(field::DEVICE_ID)
  }

  pub fn fields(&self) -> &Map<String, Value> {
    &self.0
  }

  pub fn into_fields(self) -> Map<String, Value> {
    self.0
  }
}

impl From<Map<String, Value>> for Event {
  fn from(map: Map<String, Value>) -> Self {
    Self(map)
  }
}

impl TryFrom<Value> for Event {
  type Error = JoinError;

  /// Accepts a JSON object carrying a string `type` and, if present, an
  /// RFC 3339 `time`.
  fn try_from(value: Value) -> Result<Self, Self::Error> {
    let map = match value {
      Value::Object(map) => map,
      other => return Err(JoinError::parse(format!("expected JSON object, got {}", other))),
    };
    let event = match map.get(field::TYPE) {
      Some(Value::String(_)) => Self(map),
      Some(_) => return Err(JoinError::invalid(field::TYPE, "expected string")),
      None => return Err(JoinError::missing("event", field::TYPE)),
    };
    event.time()?;
    Ok(event)
  }
}

// ---------------------------------------------------------------------------
// CLI stream wrappers
// ---------------------------------------------------------------------------

/// Structured error output, written once when the stream fails.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorOutput {
  pub error: bool,
  pub message: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub field: Option<String>,
}

impl ErrorOutput {
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      error: true,
      message: message.into(),
      field: None,
    }
  }

  pub fn with_field(mut self, field: impl Into<String>) -> Self {
    self.field = Some(field.into());
    self
  }
}

impl From<&JoinError> for ErrorOutput {
  fn from(err: &JoinError) -> Self {
    let out = Self::new(err.to_string());
    match err.field() {
      Some(f) => out.with_field(f),
      None => out,
    }
  }
}
