//! Pipeline configuration with sane defaults.

use chrono::{Duration, FixedOffset, Offset, Utc};

/// Tunables for the shipped join rules and the Dexcom source.
#[derive(Debug, Clone)]
pub struct Config {
  /// Seconds a bolus fragment waits for its partner before giving up.
  pub join_window_secs: i64,
  /// Offset of the device clock from UTC, in minutes (east positive).
  pub utc_offset_minutes: i32,
  /// `deviceId` stamped onto Dexcom readings.
  pub dexcom_device_id: String,
}

impl Config {
  pub fn join_window(&self) -> Duration {
    Duration::seconds(self.join_window_secs.clamp(0, i64::MAX / 1_000))
  }

  /// Device clock offset; out-of-range values fall back to UTC.
  pub fn utc_offset(&self) -> FixedOffset {
    self
      .utc_offset_minutes
      .checked_mul(60)
      .and_then(FixedOffset::east_opt)
      .unwrap_or_else(|| Utc.fix())
  }
}

impl Default for Config {
  fn default() -> Self {
    Self {
      join_window_secs: 60,
      utc_offset_minutes: 0,
      dexcom_device_id: "dexcom".to_string(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn offset_in_range_is_used() {
    let config = Config {
      utc_offset_minutes: -300,
      ..Config::default()
    };
    assert_eq!(config.utc_offset().local_minus_utc(), -300 * 60);
  }

  #[test]
  fn offset_out_of_range_falls_back_to_utc() {
    let config = Config {
      utc_offset_minutes: 100_000,
      ..Config::default()
    };
    assert_eq!(config.utc_offset().local_minus_utc(), 0);
  }

  #[test]
  fn negative_window_clamps_to_zero() {
    let config = Config {
      join_window_secs: -5,
      ..Config::default()
    };
    assert_eq!(config.join_window(), Duration::zero());
  }
}
