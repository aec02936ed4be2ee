//! Pipeline wiring: source → self-join → identity assignment.

use std::io::BufRead;

use crate::config::Config;
use crate::error::JoinError;
use crate::identity;
use crate::join::{join, Builder};
use crate::normalize::{self, DexcomRows};
use crate::rules;
use crate::types::Event;

/// Runs event streams through the shipped join rules and stamps ids.
///
/// Each `run*` call builds a fresh engine, so one `Pipeline` can serve many
/// independent streams.
#[derive(Debug, Clone)]
pub struct Pipeline {
  config: Config,
  assign_ids: bool,
}

impl Pipeline {
  pub fn new(config: Config) -> Self {
    Self {
      config,
      assign_ids: true,
    }
  }

  pub fn with_defaults() -> Self {
    Self::new(Config::default())
  }

  /// Skip identity assignment (emit joined events as-is).
  pub fn without_ids(mut self) -> Self {
    self.assign_ids = false;
    self
  }

  pub fn builders(&self) -> Vec<Box<dyn Builder>> {
    rules::default_builders(&self.config)
  }

  /// Join an already-normalized event stream. The output stops right after
  /// the first error, whichever stage raised it.
  pub fn run<I, E>(&self, source: I) -> impl Iterator<Item = Result<Event, JoinError>>
  where
    I: IntoIterator<Item = Result<Event, E>>,
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
  {
    let assign_ids = self.assign_ids;
    join(self.builders(), source)
      .map(move |item| match item {
        Ok(event) if assign_ids => identity::assign_id(event),
        other => other,
      })
      .scan(false, |failed, item| {
        if *failed {
          return None;
        }
        *failed = item.is_err();
        Some(item)
      })
  }

  /// JSON lines in, one normalized event per non-blank line.
  pub fn run_json_lines<R>(&self, reader: R) -> impl Iterator<Item = Result<Event, JoinError>>
  where
    R: BufRead,
  {
    let source = reader.lines().filter_map(|line| match line {
      Ok(l) => normalize::parse_json_line(&l).transpose(),
      Err(e) => Some(Err(JoinError::from(e))),
    });
    self.run(source)
  }

  /// Dexcom tab-separated export in.
  pub fn run_dexcom<R>(&self, reader: R) -> impl Iterator<Item = Result<Event, JoinError>>
  where
    R: BufRead,
  {
    self.run(DexcomRows::new(reader.lines(), self.config.clone()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::convert::Infallible;

  fn cbg(device_time: &str) -> Event {
    Event::new("cbg")
      .with("deviceId", "dexcom")
      .with("deviceTime", device_time)
      .with("time", format!("{}Z", device_time))
      .with("value", 100)
  }

  #[test]
  fn ids_are_assigned_by_default() {
    let out: Vec<_> = Pipeline::with_defaults()
      .run(vec![Ok::<_, Infallible>(cbg("2014-03-01T10:00:00"))])
      .collect();
    assert_eq!(out.len(), 1);
    assert!(out[0].as_ref().unwrap().has("_id"));
  }

  #[test]
  fn without_ids_leaves_events_alone() {
    let event = cbg("2014-03-01T10:00:00");
    let out: Vec<_> = Pipeline::with_defaults()
      .without_ids()
      .run(vec![Ok::<_, Infallible>(event.clone())])
      .collect();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].as_ref().unwrap(), &event);
  }

  #[test]
  fn identity_failure_stops_the_stream() {
    let out: Vec<_> = Pipeline::with_defaults()
      .run(vec![
        Ok::<_, Infallible>(cbg("2014-03-01T10:00:00")),
        Ok(Event::new("food").with("carbs", 30)),
        Ok(cbg("2014-03-01T10:05:00")),
      ])
      .collect();
    assert_eq!(out.len(), 2);
    assert!(out[0].is_ok());
    assert!(matches!(out[1], Err(JoinError::UnknownType(_))));
  }

  #[test]
  fn bad_json_line_is_an_upstream_failure_with_field() {
    let input = "{\"type\":\"cbg\",\"deviceId\":\"d\",\"deviceTime\":\"t\"}\n\n{\"value\":1}\n";
    let out: Vec<_> = Pipeline::with_defaults().run_json_lines(input.as_bytes()).collect();
    assert_eq!(out.len(), 2);
    let err = out[1].as_ref().unwrap_err();
    assert!(matches!(err, JoinError::Upstream(_)));
    assert_eq!(err.field(), Some("type"));
  }

  #[test]
  fn bad_time_fails_the_same_way_with_or_without_a_pending_join() {
    let bad = "{\"type\":\"cbg\",\"value\":100,\"deviceId\":\"d\",\"time\":\"not-a-time\"}\n";
    let bolus = "{\"type\":\"bolus\",\"subType\":\"normal\",\"value\":1.0,\"joinKey\":\"k\",\"deviceId\":\"d\",\"time\":\"2014-03-01T10:00:00Z\"}\n";

    for input in [bad.to_string(), format!("{}{}", bolus, bad)] {
      let out: Vec<_> = Pipeline::with_defaults().run_json_lines(input.as_bytes()).collect();
      assert_eq!(out.len(), 1, "nothing but the failure: {:?}", out);
      let err = out[0].as_ref().unwrap_err();
      assert!(matches!(err, JoinError::Upstream(_)));
      assert_eq!(err.field(), Some("time"));
    }
  }

  #[test]
  fn dexcom_rows_flow_through() {
    let input = "header\trow\n\t\t2014-03-01 09:58:12\t2014-03-01 10:00:00\t120\n";
    let out: Vec<_> = Pipeline::with_defaults().run_dexcom(input.as_bytes()).collect();
    assert_eq!(out.len(), 1);
    let event = out[0].as_ref().unwrap();
    assert!(event.is("cbg"));
    assert!(event.has("_id"));
  }
}
