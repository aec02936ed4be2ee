//! Self-join engine: merges fragment events of one stream into composites.
//!
//! Every event is offered to the registered builders while no handler is
//! active. The first builder that recognizes the event yields a [`Handler`],
//! which then receives every event (starting with the one that matched)
//! until it returns a result sequence. The results are fed back through the
//! same process before the next upstream event is taken, so a composite can
//! itself open another join (join-of-joins).
//!
//! Two surfaces share the implementation:
//! - [`SelfJoin`]: push API with `push` / `complete` / `fail` entry points.
//! - [`Joined`]: pull adapter over any `Iterator<Item = Result<Event, E>>`.

use std::collections::VecDeque;
use std::fmt;
use std::iter::FusedIterator;

use tracing::{debug, trace, warn};

use crate::error::JoinError;
use crate::types::Event;

/// Stateful accumulator for one in-progress composite.
pub trait Handler {
  /// Offer the next event. `Ok(None)` keeps the handler active; `Ok(Some(_))`
  /// (even empty) resolves it and hands the events back to the engine.
  fn handle(&mut self, event: Event) -> Result<Option<Vec<Event>>, JoinError>;

  /// Forced finalization at end-of-stream.
  fn completed(self: Box<Self>) -> Result<Vec<Event>, JoinError>;
}

/// Stateless recognizer for the first fragment of a composite.
pub trait Builder {
  fn build(&self, event: &Event) -> Option<Box<dyn Handler>>;
}

impl<F> Builder for F
where
  F: Fn(&Event) -> Option<Box<dyn Handler>>,
{
  fn build(&self, event: &Event) -> Option<Box<dyn Handler>> {
    self(event)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
  Open,
  Completed,
  Failed,
}

/// One engine per event stream. Owns the single active-handler slot.
pub struct SelfJoin {
  builders: Vec<Box<dyn Builder>>,
  active: Option<Box<dyn Handler>>,
  state: State,
}

impl SelfJoin {
  /// Builders are consulted in the given order; the first match wins.
  pub fn new(builders: Vec<Box<dyn Builder>>) -> Self {
    Self {
      builders,
      active: None,
      state: State::Open,
    }
  }

  pub fn is_active(&self) -> bool {
    self.active.is_some()
  }

  pub fn is_terminated(&self) -> bool {
    self.state != State::Open
  }

  /// Process one upstream event, emitting everything it resolves to.
  pub fn push<F>(&mut self, event: Event, emit: &mut F) -> Result<(), JoinError>
  where
    F: FnMut(Event),
  {
    self.ensure_open()?;
    self.resolve(vec![event], emit)
  }

  /// Upstream finished: flush the active handler, then close the stream.
  ///
  /// If flushing starts another join, that handler is force-completed too,
  /// repeatedly, until no handler remains.
  pub fn complete<F>(&mut self, emit: &mut F) -> Result<(), JoinError>
  where
    F: FnMut(Event),
  {
    self.ensure_open()?;
    while let Some(handler) = self.active.take() {
      let results = match handler.completed() {
        Ok(results) => results,
        Err(err) => return Err(self.abort(err)),
      };
      debug!(results = results.len(), "end of stream: handler flushed");
      self.resolve(results, emit)?;
    }
    self.state = State::Completed;
    Ok(())
  }

  /// Upstream failed. The active handler is dropped without being invoked.
  pub fn fail<E>(&mut self, err: E) -> JoinError
  where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
  {
    if self.is_terminated() {
      return JoinError::Terminated;
    }
    if self.active.take().is_some() {
      debug!("upstream failed: discarding active handler");
    }
    self.state = State::Failed;
    JoinError::upstream(err)
  }

  fn ensure_open(&self) -> Result<(), JoinError> {
    match self.state {
      State::Open => Ok(()),
      _ => Err(JoinError::Terminated),
    }
  }

  /// Work-list form of the recursive `processEvent`: results are pushed
  /// back in reverse so the stack pops them depth-first, left to right.
  fn resolve<F>(&mut self, events: Vec<Event>, emit: &mut F) -> Result<(), JoinError>
  where
    F: FnMut(Event),
  {
    let mut pending: Vec<Event> = events;
    pending.reverse();

    while let Some(event) = pending.pop() {
      if self.active.is_none() {
        self.active = self.activate(&event);
      }

      let handler = match self.active.as_mut() {
        Some(h) => h,
        None => {
          trace!(event_type = event.kind(), "pass through");
          emit(event);
          continue;
        }
      };

      match handler.handle(event) {
        Ok(None) => {}
        Ok(Some(results)) => {
          self.active = None;
          debug!(results = results.len(), "handler resolved");
          pending.extend(results.into_iter().rev());
        }
        Err(err) => return Err(self.abort(err)),
      }
    }
    Ok(())
  }

  fn activate(&self, event: &Event) -> Option<Box<dyn Handler>> {
    self.builders.iter().enumerate().find_map(|(index, builder)| {
      let handler = builder.build(event)?;
      debug!(builder = index, event_type = event.kind(), "handler activated");
      Some(handler)
    })
  }

  fn abort(&mut self, err: JoinError) -> JoinError {
    warn!(error = %err, "handler failed; stream terminated");
    self.active = None;
    self.state = State::Failed;
    err
  }
}

impl fmt::Debug for SelfJoin {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SelfJoin")
      .field("builders", &self.builders.len())
      .field("active", &self.active.is_some())
      .field("state", &self.state)
      .finish()
  }
}

/// Run a complete, infallible event sequence through a fresh engine.
pub fn join_all<I>(builders: Vec<Box<dyn Builder>>, events: I) -> Result<Vec<Event>, JoinError>
where
  I: IntoIterator<Item = Event>,
{
  let mut engine = SelfJoin::new(builders);
  let mut out = Vec::new();
  let mut emit = |e: Event| out.push(e);
  for event in events {
    engine.push(event, &mut emit)?;
  }
  engine.complete(&mut emit)?;
  Ok(out)
}

// ---------------------------------------------------------------------------
// Pull adapter
// ---------------------------------------------------------------------------

/// Iterator over the joined stream. Yields `Ok` events, then ends; or yields
/// a single `Err` and ends. Pulls one upstream item per turn.
pub struct Joined<I> {
  source: I,
  engine: SelfJoin,
  ready: VecDeque<Event>,
  failure: Option<JoinError>,
}

/// Wrap `source` in a self-join over `builders`.
pub fn join<I>(builders: Vec<Box<dyn Builder>>, source: I) -> Joined<I::IntoIter>
where
  I: IntoIterator,
{
  Joined {
    source: source.into_iter(),
    engine: SelfJoin::new(builders),
    ready: VecDeque::new(),
    failure: None,
  }
}

impl<I, E> Iterator for Joined<I>
where
  I: Iterator<Item = Result<Event, E>>,
  E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
  type Item = Result<Event, JoinError>;

  fn next(&mut self) -> Option<Self::Item> {
    loop {
      if let Some(event) = self.ready.pop_front() {
        return Some(Ok(event));
      }
      if let Some(err) = self.failure.take() {
        return Some(Err(err));
      }
      if self.engine.is_terminated() {
        return None;
      }

      let ready = &mut self.ready;
      let mut emit = |e: Event| ready.push_back(e);
      let step = match self.source.next() {
        Some(Ok(event)) => self.engine.push(event, &mut emit),
        Some(Err(err)) => Err(self.engine.fail(err)),
        None => self.engine.complete(&mut emit),
      };
      if let Err(err) = step {
        self.failure = Some(err);
      }
    }
  }
}

impl<I, E> FusedIterator for Joined<I>
where
  I: Iterator<Item = Result<Event, E>>,
  E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
}

impl<I> fmt::Debug for Joined<I> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Joined")
      .field("engine", &self.engine)
      .field("ready", &self.ready.len())
      .finish()
  }
}

/// `events.self_join(builders)` for any fallible event iterator.
pub trait SelfJoinExt: Iterator + Sized {
  fn self_join(self, builders: Vec<Box<dyn Builder>>) -> Joined<Self> {
    join(builders, self)
  }
}

impl<I: Iterator> SelfJoinExt for I {}
