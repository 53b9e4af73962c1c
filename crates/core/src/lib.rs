//! hearth core: turns one utterance into a cached or model-mediated reply,
//! executes the resulting home actions and keeps per-speaker conversation state.

pub mod capability;
pub mod cognition;
pub mod config;
pub mod error;
pub mod io;
pub mod memory;
pub mod runtime;
pub mod types;

pub use config::HearthCfg;
pub use error::TurnError;
pub use runtime::{Collaborators, Orchestrator};
pub use types::{Reply, ReplyKind, TurnRequest};
