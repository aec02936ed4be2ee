//! Binary entrypoint: read device events from stdin, write JSON lines to stdout.
//!
//! Input is either normalized events as JSON lines, or a raw Dexcom export.
//! Each output line is one joined event with its `_id`. On the first failure
//! a single ErrorOutput line is written and the process exits non-zero;
//! nothing follows it.

use std::io::{self, Write};

use clap::{Parser, ValueEnum};
use event_join::types::ErrorOutput;
use event_join::{Config, Event, JoinError, Pipeline};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Format {
  /// One normalized event object per line.
  Jsonl,
  /// Dexcom tab-separated export.
  Dexcom,
}

#[derive(Parser, Debug)]
#[command(name = "event-join")]
#[command(about = "Join device event fragments into composite events")]
#[command(version)]
struct Args {
  /// Input format on stdin
  #[arg(long, value_enum, default_value = "jsonl", env = "EVENT_JOIN_FORMAT")]
  format: Format,

  /// Seconds a bolus fragment waits for its partner
  #[arg(long, default_value_t = 60, env = "EVENT_JOIN_WINDOW_SECS")]
  join_window_secs: i64,

  /// Device clock offset from UTC in minutes (Dexcom input)
  #[arg(long, default_value_t = 0, allow_hyphen_values = true, env = "EVENT_JOIN_UTC_OFFSET_MINUTES")]
  utc_offset_minutes: i32,

  /// deviceId stamped onto Dexcom readings
  #[arg(long, default_value = "dexcom", env = "EVENT_JOIN_DEXCOM_DEVICE_ID")]
  dexcom_device_id: String,

  /// Emit joined events without `_id`
  #[arg(long)]
  no_ids: bool,
}

fn main() {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("event_join=info")))
    .with_writer(io::stderr)
    .init();

  let args = Args::parse();
  let config = Config {
    join_window_secs: args.join_window_secs,
    utc_offset_minutes: args.utc_offset_minutes,
    dexcom_device_id: args.dexcom_device_id.clone(),
  };
  let mut pipeline = Pipeline::new(config);
  if args.no_ids {
    pipeline = pipeline.without_ids();
  }

  info!(format = ?args.format, "event-join starting");

  let stdin = io::stdin();
  let stdout = io::stdout();
  let mut out = io::BufWriter::new(stdout.lock());

  let events: Box<dyn Iterator<Item = Result<Event, JoinError>>> = match args.format {
    Format::Jsonl => Box::new(pipeline.run_json_lines(stdin.lock())),
    Format::Dexcom => Box::new(pipeline.run_dexcom(stdin.lock())),
  };

  let mut emitted = 0usize;
  for item in events {
    match item {
      Ok(event) => {
        let _ = serde_json::to_writer(&mut out, &event);
        let _ = writeln!(out);
        emitted += 1;
      }
      Err(e) => {
        error!(error = %e, emitted, "stream failed");
        let _ = serde_json::to_writer(&mut out, &ErrorOutput::from(&e));
        let _ = writeln!(out);
        let _ = out.flush();
        std::process::exit(1);
      }
    }
  }

  let _ = out.flush();
  info!(emitted, "event-join finished");
}
