//! Sources: turn raw input lines into normalized events.
//!
//! - JSON lines: each line is one already-normalized event object.
//! - Dexcom export: tab-separated rows, one continuous glucose reading each.

use std::io;

use chrono::{DateTime, FixedOffset, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use tracing::debug;

use crate::config::Config;
use crate::error::JoinError;
use crate::types::{field, Event};

const DEXCOM_TIME: &str = "%Y-%m-%d %H:%M:%S";
const DEVICE_TIME: &str = "%Y-%m-%dT%H:%M:%S";

/// Readings the receiver reports as "Low" / "High" fall outside its range.
const LOW_READING: f64 = 39.0;
const HIGH_READING: f64 = 401.0;

mod columns {
  pub const GLUCOSE_DISPLAY_TIME: usize = 3;
  pub const GLUCOSE_VALUE: usize = 4;
}

// ---------------------------------------------------------------------------
// JSON lines
// ---------------------------------------------------------------------------

/// Parse one JSON line. Blank lines yield `Ok(None)`.
pub fn parse_json_line(line: &str) -> Result<Option<Event>, JoinError> {
  let trimmed = line.trim();
  if trimmed.is_empty() {
    return Ok(None);
  }
  let value: serde_json::Value = serde_json::from_str(trimmed)?;
  Event::try_from(value).map(Some)
}

// ---------------------------------------------------------------------------
// Dexcom
// ---------------------------------------------------------------------------

/// Shift a device-local timestamp to UTC.
pub fn device_time_to_utc(device_time: &NaiveDateTime, offset: FixedOffset) -> Option<DateTime<Utc>> {
  offset
    .from_local_datetime(device_time)
    .single()
    .map(|t| t.with_timezone(&Utc))
}

/// Numeric glucose value of a raw cell: a number, or a lo/hi marker.
fn reading_value(raw: &str) -> Option<f64> {
  let cell = raw.trim();
  let lower = cell.to_ascii_lowercase();
  if lower.starts_with("lo") && lower.len() > 2 {
    return Some(LOW_READING);
  }
  if lower.starts_with("hi") && lower.len() > 2 {
    return Some(HIGH_READING);
  }
  cell.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parse one Dexcom row into a `cbg` event. Rows without a usable value or
/// display time (headers, blank lines, meter-only rows) yield `None`.
pub fn parse_dexcom_row(line: &str, config: &Config) -> Option<Event> {
  let cells: Vec<&str> = line.split('\t').collect();
  let raw_time = cells.get(columns::GLUCOSE_DISPLAY_TIME)?.trim();
  let value = reading_value(cells.get(columns::GLUCOSE_VALUE)?)?;

  let device_time = NaiveDateTime::parse_from_str(raw_time, DEXCOM_TIME).ok()?;
  let time = device_time_to_utc(&device_time, config.utc_offset())?;

  Some(
    Event::new("cbg")
      .with(field::VALUE, value)
      .with(field::UNITS, "mg/dL")
      .with(field::DEVICE_TIME, device_time.format(DEVICE_TIME).to_string())
      .with(field::TIME, time.to_rfc3339_opts(SecondsFormat::Secs, true))
      .with(field::DEVICE_ID, config.dexcom_device_id.as_str())
      .with(field::SOURCE, "csvUpload"),
  )
}

/// Iterator adapter: Dexcom export lines in, `cbg` events out.
///
/// Invalid rows are dropped; read errors pass through.
pub struct DexcomRows<I> {
  lines: I,
  config: Config,
  line_no: usize,
}

impl<I> DexcomRows<I> {
  pub fn new(lines: I, config: Config) -> Self {
    Self {
      lines,
      config,
      line_no: 0,
    }
  }
}

impl<I> Iterator for DexcomRows<I>
where
  I: Iterator<Item = io::Result<String>>,
{
  type Item = io::Result<Event>;

  fn next(&mut self) -> Option<Self::Item> {
    loop {
      let line = match self.lines.next()? {
        Ok(l) => l,
        Err(e) => return Some(Err(e)),
      };
      self.line_no += 1;
      match parse_dexcom_row(&line, &self.config) {
        Some(event) => return Some(Ok(event)),
        None => debug!(line = self.line_no, "dropping invalid dexcom row"),
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn row(display_time: &str, value: &str) -> String {
    format!(
      "\t\t2014-03-01 09:58:12\t{}\t{}\t\t\t",
      display_time, value
    )
  }

  #[test]
  fn numeric_reading_becomes_cbg() {
    let event = parse_dexcom_row(&row("2014-03-01 10:00:00", "120"), &Config::default()).unwrap();
    assert!(event.is("cbg"));
    assert_eq!(event.get("value").and_then(|v| v.as_f64()), Some(120.0));
    assert_eq!(event.str_field("units"), Some("mg/dL"));
    assert_eq!(event.str_field("deviceTime"), Some("2014-03-01T10:00:00"));
    assert_eq!(event.str_field("time"), Some("2014-03-01T10:00:00Z"));
    assert_eq!(event.str_field("deviceId"), Some("dexcom"));
    assert_eq!(event.str_field("source"), Some("csvUpload"));
  }

  #[test]
  fn low_and_high_markers_map_to_range_limits() {
    let config = Config::default();
    let low = parse_dexcom_row(&row("2014-03-01 10:00:00", "Low"), &config).unwrap();
    let high = parse_dexcom_row(&row("2014-03-01 10:05:00", "HIGH"), &config).unwrap();
    assert_eq!(low.get("value").and_then(|v| v.as_f64()), Some(39.0));
    assert_eq!(high.get("value").and_then(|v| v.as_f64()), Some(401.0));
  }

  #[test]
  fn invalid_rows_are_dropped() {
    let config = Config::default();
    let header = "PatientInfoField\tPatientInfoValue\tGlucoseInternalTime\tGlucoseDisplayTime\tGlucoseValue";
    assert!(parse_dexcom_row(header, &config).is_none());
    assert!(parse_dexcom_row("", &config).is_none());
    assert!(parse_dexcom_row(&row("2014-03-01 10:00:00", ""), &config).is_none());
    assert!(parse_dexcom_row(&row("not a time", "120"), &config).is_none());
  }

  #[test]
  fn offset_shifts_time_but_not_device_time() {
    let config = Config {
      utc_offset_minutes: -300,
      ..Config::default()
    };
    let event = parse_dexcom_row(&row("2014-03-01 22:30:00", "98"), &config).unwrap();
    assert_eq!(event.str_field("deviceTime"), Some("2014-03-01T22:30:00"));
    assert_eq!(event.str_field("time"), Some("2014-03-02T03:30:00Z"));
  }

  #[test]
  fn rows_adapter_skips_bad_lines_and_keeps_errors() {
    let lines = vec![
      Ok("header\tline".to_string()),
      Ok(row("2014-03-01 10:00:00", "120")),
      Err(io::Error::new(io::ErrorKind::Other, "truncated")),
    ];
    let out: Vec<_> = DexcomRows::new(lines.into_iter(), Config::default()).collect();
    assert_eq!(out.len(), 2);
    assert!(out[0].is_ok());
    assert!(out[1].is_err());
  }

  #[test]
  fn json_line_parsing() {
    assert!(parse_json_line("   ").unwrap().is_none());
    let event = parse_json_line(r#"{"type":"smbg","value":5.5}"#).unwrap().unwrap();
    assert!(event.is("smbg"));
    assert!(matches!(parse_json_line("{oops"), Err(JoinError::Json(_))));
    assert!(matches!(
      parse_json_line(r#"{"value":1}"#),
      Err(JoinError::MissingField { .. })
    ));
    assert!(matches!(
      parse_json_line(r#"{"type":"cbg","time":"2014-03-01 10:00"}"#),
      Err(JoinError::InvalidField { .. })
    ));
  }
}
