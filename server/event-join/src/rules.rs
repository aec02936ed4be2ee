//! Join rules for pump exports: dual-wave boluses, bolus + wizard pairs and
//! basal rate intervals.
//!
//! Each rule only matches fragments still in their raw shape, and every
//! event a handler hands back is in a shape its own builder rejects, so
//! re-processing results always terminates.

use chrono::{DateTime, Duration, Utc};
use serde_json::{Map, Value};

use crate::config::Config;
use crate::error::JoinError;
use crate::join::{Builder, Handler};
use crate::types::{field, Event};

pub const BOLUS: &str = "bolus";
pub const WIZARD: &str = "wizard";
pub const BASAL_RATE_CHANGE: &str = "basal-rate-change";

pub const DUAL_NORMAL: &str = "dual/normal";
pub const DUAL_SQUARE: &str = "dual/square";

pub const MISSING_SQUARE: &str = "bolus/missing-square-component";
pub const UNKNOWN_DURATION: &str = "basal/unknown-duration";

/// Wizard fields that describe the event itself rather than the calculation.
const WIZARD_ENVELOPE: [&str; 6] = [
  field::TYPE,
  field::DEVICE_ID,
  field::DEVICE_TIME,
  field::TIME,
  field::SOURCE,
  field::JOIN_KEY,
];

/// The shipped rules, in priority order. Dual-wave fragments are merged
/// before the wizard rule sees the resulting bolus.
pub fn default_builders(config: &Config) -> Vec<Box<dyn Builder>> {
  let window = config.join_window();
  vec![dual_bolus(window), bolus_wizard(window), basal_interval()]
}

/// True once `event` is later than `opened_at + window`. Events without a
/// `time` never close a window.
fn expired(opened_at: Option<DateTime<Utc>>, event: &Event, window: Duration) -> Result<bool, JoinError> {
  match (opened_at, event.time()?) {
    (Some(start), Some(at)) => Ok(at - start > window),
    _ => Ok(false),
  }
}

fn require<'a>(event: &'a Event, name: &str) -> Result<&'a Value, JoinError> {
  event
    .get(name)
    .ok_or_else(|| JoinError::missing(event.kind(), name))
}

fn is_bolus_of(event: &Event, sub_types: &[&str]) -> bool {
  event.is(BOLUS)
    && event
      .str_field(field::SUB_TYPE)
      .map_or(false, |s| sub_types.contains(&s))
}

// ---------------------------------------------------------------------------
// Dual-wave bolus: "dual/normal" fragment + "dual/square" fragment
// ---------------------------------------------------------------------------

pub fn dual_bolus(window: Duration) -> Box<dyn Builder> {
  Box::new(move |e: &Event| -> Option<Box<dyn Handler>> {
    if is_bolus_of(e, &[DUAL_NORMAL]) && e.has(field::JOIN_KEY) {
      Some(Box::new(DualBolus {
        window,
        normal: None,
        opened_at: None,
        held: Vec::new(),
      }))
    } else {
      None
    }
  })
}

struct DualBolus {
  window: Duration,
  normal: Option<Event>,
  opened_at: Option<DateTime<Utc>>,
  held: Vec<Event>,
}

impl DualBolus {
  fn is_square_half(normal: &Event, event: &Event) -> bool {
    is_bolus_of(event, &[DUAL_SQUARE]) && !event.has("normal") && normal.shares_join_key(event)
  }

  fn merge(normal: Event, square: &Event) -> Result<Event, JoinError> {
    let normal_value = require(&normal, field::VALUE)?.clone();
    let extended = require(square, field::VALUE)?.clone();
    let duration = require(square, field::DURATION)?.clone();
    Ok(
      normal
        .without(field::VALUE)
        .with(field::SUB_TYPE, DUAL_SQUARE)
        .with("normal", normal_value)
        .with("extended", extended)
        .with(field::DURATION, duration),
    )
  }

  /// A normal half whose square half never showed up.
  fn orphan(normal: Event) -> Result<Event, JoinError> {
    let normal_value = require(&normal, field::VALUE)?.clone();
    Ok(
      normal
        .without(field::VALUE)
        .with(field::SUB_TYPE, DUAL_SQUARE)
        .with("normal", normal_value)
        .with("extended", 0)
        .with(field::DURATION, 0)
        .annotate(MISSING_SQUARE),
    )
  }
}

impl Handler for DualBolus {
  fn handle(&mut self, event: Event) -> Result<Option<Vec<Event>>, JoinError> {
    let normal = match self.normal.take() {
      Some(n) => n,
      None => {
        self.opened_at = event.time()?;
        self.normal = Some(event);
        return Ok(None);
      }
    };

    if Self::is_square_half(&normal, &event) {
      let mut out = std::mem::take(&mut self.held);
      out.push(Self::merge(normal, &event)?);
      return Ok(Some(out));
    }

    if expired(self.opened_at, &event, self.window)? {
      let mut out = vec![Self::orphan(normal)?];
      out.append(&mut self.held);
      out.push(event);
      return Ok(Some(out));
    }

    self.normal = Some(normal);
    self.held.push(event);
    Ok(None)
  }

  fn completed(self: Box<Self>) -> Result<Vec<Event>, JoinError> {
    let mut out = Vec::with_capacity(self.held.len() + 1);
    if let Some(normal) = self.normal {
      out.push(Self::orphan(normal)?);
    }
    out.extend(self.held);
    Ok(out)
  }
}

// ---------------------------------------------------------------------------
// Bolus + wizard calculation sharing a joinKey
// ---------------------------------------------------------------------------

pub fn bolus_wizard(window: Duration) -> Box<dyn Builder> {
  Box::new(move |e: &Event| -> Option<Box<dyn Handler>> {
    if is_bolus_of(e, &["normal", "square", DUAL_SQUARE]) && e.has(field::JOIN_KEY) {
      Some(Box::new(BolusWizard {
        window,
        bolus: None,
        opened_at: None,
        held: Vec::new(),
      }))
    } else {
      None
    }
  })
}

struct BolusWizard {
  window: Duration,
  bolus: Option<Event>,
  opened_at: Option<DateTime<Utc>>,
  held: Vec<Event>,
}

impl BolusWizard {
  fn attach(bolus: Event, wizard: Event) -> Event {
    let mut calc: Map<String, Value> = wizard.into_fields();
    for name in WIZARD_ENVELOPE {
      calc.remove(name);
    }
    bolus.without(field::JOIN_KEY).with("wizard", Value::Object(calc))
  }
}

impl Handler for BolusWizard {
  fn handle(&mut self, event: Event) -> Result<Option<Vec<Event>>, JoinError> {
    let bolus = match self.bolus.take() {
      Some(b) => b,
      None => {
        self.opened_at = event.time()?;
        self.bolus = Some(event);
        return Ok(None);
      }
    };

    if event.is(WIZARD) && bolus.shares_join_key(&event) {
      let mut out = std::mem::take(&mut self.held);
      out.push(Self::attach(bolus, event));
      return Ok(Some(out));
    }

    if expired(self.opened_at, &event, self.window)? {
      let mut out = vec![bolus.without(field::JOIN_KEY)];
      out.append(&mut self.held);
      out.push(event);
      return Ok(Some(out));
    }

    self.bolus = Some(bolus);
    self.held.push(event);
    Ok(None)
  }

  fn completed(self: Box<Self>) -> Result<Vec<Event>, JoinError> {
    let mut out = Vec::with_capacity(self.held.len() + 1);
    if let Some(bolus) = self.bolus {
      out.push(bolus.without(field::JOIN_KEY));
    }
    out.extend(self.held);
    Ok(out)
  }
}

// ---------------------------------------------------------------------------
// Basal rate interval: open until the device's next rate change
// ---------------------------------------------------------------------------

pub fn basal_interval() -> Box<dyn Builder> {
  Box::new(|e: &Event| -> Option<Box<dyn Handler>> {
    if e.is(BASAL_RATE_CHANGE) && !e.has(field::DURATION) && !e.has_annotation(UNKNOWN_DURATION) {
      Some(Box::new(BasalInterval {
        opener: None,
        held: Vec::new(),
      }))
    } else {
      None
    }
  })
}

struct BasalInterval {
  opener: Option<(Event, DateTime<Utc>)>,
  held: Vec<Event>,
}

impl Handler for BasalInterval {
  fn handle(&mut self, event: Event) -> Result<Option<Vec<Event>>, JoinError> {
    let (opener, start) = match self.opener.take() {
      Some(o) => o,
      None => {
        let start = event.require_time()?;
        self.opener = Some((event, start));
        return Ok(None);
      }
    };

    let closes = event.is(BASAL_RATE_CHANGE)
      && event.get(field::DEVICE_ID) == opener.get(field::DEVICE_ID);
    if !closes {
      self.opener = Some((opener, start));
      self.held.push(event);
      return Ok(None);
    }

    let end = event.require_time()?;
    let millis = (end - start).num_milliseconds();
    if millis < 0 {
      return Err(JoinError::handler(
        "basal-interval",
        &format!("rate change at {} precedes interval start {}", end, start),
      ));
    }

    let mut out = std::mem::take(&mut self.held);
    out.push(opener.with(field::DURATION, millis));
    out.push(event);
    Ok(Some(out))
  }

  fn completed(self: Box<Self>) -> Result<Vec<Event>, JoinError> {
    let mut out = self.held;
    if let Some((opener, _)) = self.opener {
      out.push(opener.annotate(UNKNOWN_DURATION));
    }
    Ok(out)
  }
}
