//! Structured error types for the join pipeline.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum JoinError {
  /// The event source failed before the engine saw the event.
  #[error("upstream: {0}")]
  Upstream(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("handler {rule}: {reason}")]
  Handler { rule: String, reason: String },

  #[error("missing field: {event_type}.{field}")]
  MissingField { event_type: String, field: String },

  #[error("invalid field: {field}: {reason}")]
  InvalidField { field: String, reason: String },

  #[error("unknown event type [{0}]")]
  UnknownType(String),

  #[error("parse: {0}")]
  Parse(String),

  #[error("json: {0}")]
  Json(#[from] serde_json::Error),

  #[error("io: {0}")]
  Io(#[from] std::io::Error),

  /// An entry point was called after the stream already completed or failed.
  #[error("stream already terminated")]
  Terminated,
}

impl JoinError {
  pub fn upstream<E>(err: E) -> Self
  where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
  {
    Self::Upstream(err.into())
  }

  pub fn handler(rule: &str, reason: &str) -> Self {
    Self::Handler {
      rule: rule.to_string(),
      reason: reason.to_string(),
    }
  }

  pub fn missing(event_type: &str, field: &str) -> Self {
    Self::MissingField {
      event_type: event_type.to_string(),
      field: field.to_string(),
    }
  }

  pub fn invalid(field: &str, reason: &str) -> Self {
    Self::InvalidField {
      field: field.to_string(),
      reason: reason.to_string(),
    }
  }

  pub fn parse(msg: impl Into<String>) -> Self {
    Self::Parse(msg.into())
  }

  /// Field name the error refers to, if any (used for CLI error output).
  pub fn field(&self) -> Option<&str> {
    match self {
      Self::MissingField { field, .. } | Self::InvalidField { field, .. } => Some(field.as_str()),
      Self::Upstream(inner) => inner.downcast_ref::<JoinError>().and_then(JoinError::field),
      _ => None,
    }
  }
}
