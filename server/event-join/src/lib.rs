//! Device event self-join pipeline — deterministic, rule-based.
//!
//! Reconstructs composite events (dual-wave boluses, bolus + wizard pairs,
//! basal rate intervals) from the fragment rows pump and meter exports write,
//! then stamps every event with an id derived from its defining fields.
//!
//! The join engine in [`join`](mod@join) is domain-agnostic: it only knows builders and
//! handlers. The pump-specific rules live in [`rules`].
//!
//! No DB, no network; pure computation + in-memory state.

pub mod config;
pub mod error;
pub mod identity;
pub mod join;
pub mod normalize;
pub mod pipeline;
pub mod rules;
pub mod types;

pub use config::Config;
pub use error::JoinError;
pub use join::{join, join_all, Builder, Handler, Joined, SelfJoin, SelfJoinExt};
pub use pipeline::Pipeline;
pub use types::Event;
