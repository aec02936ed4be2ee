//! Deterministic event ids derived from each type's defining fields.

use serde_json::Value;

use crate::error::JoinError;
use crate::types::{field, Event};

/// Defining fields per event type, hashed in this order.
const RECIPES: &[(&str, &[&str])] = &[
  (
    "basal-rate-change",
    &[field::TYPE, field::DELIVERY_TYPE, field::DEVICE_ID, field::DEVICE_TIME],
  ),
  ("bolus", &[field::TYPE, field::SUB_TYPE, field::DEVICE_ID, field::DEVICE_TIME]),
  ("wizard", &[field::TYPE, field::DEVICE_ID, field::DEVICE_TIME]),
  ("cbg", &[field::TYPE, field::DEVICE_ID, field::DEVICE_TIME]),
  ("smbg", &[field::TYPE, field::DEVICE_ID, field::DEVICE_TIME]),
  ("settings", &[field::TYPE, field::DEVICE_ID, field::DEVICE_TIME]),
];

fn recipe(kind: &str) -> Option<&'static [&'static str]> {
  RECIPES
    .iter()
    .find(|(k, _)| *k == kind)
    .map(|(_, fields)| *fields)
}

/// Compute the id for an event without modifying it.
///
/// Uses blake3 over the defining values, `|`-separated; strings hash as
/// their text, other scalars as their JSON text.
pub fn compute(event: &Event) -> Result<String, JoinError> {
  let kind = event.kind();
  let fields = recipe(kind).ok_or_else(|| JoinError::UnknownType(kind.to_string()))?;

  let mut hasher = blake3::Hasher::new();
  for (i, name) in fields.iter().enumerate() {
    let value = event
      .get(name)
      .ok_or_else(|| JoinError::missing(kind, name))?;
    if i > 0 {
      hasher.update(b"|");
    }
    match value {
      Value::String(s) => hasher.update(s.as_bytes()),
      other => hasher.update(other.to_string().as_bytes()),
    };
  }

  // First 16 bytes (32 hex chars), same width as other ids in the pipeline.
  let hex = hasher.finalize().to_hex();
  Ok(hex[..32].to_string())
}

/// Stamp `_id` onto the event.
pub fn assign_id(event: Event) -> Result<Event, JoinError> {
  let id = compute(&event)?;
  Ok(event.with(field::ID, id))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn bolus(sub_type: &str, device: &str, time: &str) -> Event {
    Event::new("bolus")
      .with("subType", sub_type)
      .with("deviceId", device)
      .with("deviceTime", time)
  }

  #[test]
  fn same_fields_same_id() {
    let a = bolus("normal", "pump", "2014-03-01T10:00:00");
    let b = bolus("normal", "pump", "2014-03-01T10:00:00").with("value", 4.2);
    assert_eq!(compute(&a).unwrap(), compute(&b).unwrap());
  }

  #[test]
  fn any_defining_field_changes_id() {
    let base = compute(&bolus("normal", "pump", "2014-03-01T10:00:00")).unwrap();
    assert_ne!(base, compute(&bolus("square", "pump", "2014-03-01T10:00:00")).unwrap());
    assert_ne!(base, compute(&bolus("normal", "meter", "2014-03-01T10:00:00")).unwrap());
    assert_ne!(base, compute(&bolus("normal", "pump", "2014-03-01T10:00:01")).unwrap());
  }

  #[test]
  fn separator_keeps_adjacent_fields_apart() {
    let a = Event::new("cbg").with("deviceId", "ab").with("deviceTime", "c");
    let b = Event::new("cbg").with("deviceId", "a").with("deviceTime", "bc");
    assert_ne!(compute(&a).unwrap(), compute(&b).unwrap());
  }

  #[test]
  fn id_is_32_hex_chars() {
    let event = assign_id(bolus("normal", "pump", "2014-03-01T10:00:00")).unwrap();
    let id = event.str_field("_id").unwrap();
    assert_eq!(id.len(), 32);
    assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
  }

  #[test]
  fn missing_field_is_reported() {
    let err = compute(&Event::new("bolus").with("deviceId", "pump")).unwrap_err();
    match err {
      JoinError::MissingField { event_type, field } => {
        assert_eq!(event_type, "bolus");
        assert_eq!(field, "subType");
      }
      other => panic!("unexpected error: {}", other),
    }
  }

  #[test]
  fn null_counts_as_missing() {
    let event = bolus("normal", "pump", "2014-03-01T10:00:00").with("deviceId", Value::Null);
    assert!(matches!(compute(&event), Err(JoinError::MissingField { .. })));
  }

  #[test]
  fn unknown_type_is_rejected() {
    let err = compute(&Event::new("food")).unwrap_err();
    assert!(err.to_string().contains("food"));
  }

  #[test]
  fn basal_uses_delivery_type() {
    let scheduled = Event::new("basal-rate-change")
      .with("deliveryType", "scheduled")
      .with("deviceId", "pump")
      .with("deviceTime", "2014-03-01T00:00:00");
    let temp = scheduled.clone().with("deliveryType", "temp");
    assert_ne!(compute(&scheduled).unwrap(), compute(&temp).unwrap());
    assert!(compute(&scheduled.without("deliveryType")).is_err());
  }
}
