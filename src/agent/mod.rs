//! Agent Intelligence Layer — the core reasoning loop and related utilities.
//!
//! # Key types
//! - [`runner::AgentRunner`] — drives the LLM-tool iteration cycle (spec §4.8)
//! - [`session::Session`] / [`session::CompactionEngine`] — history + compaction (spec §4.9)
//! - [`workspace::WorkspaceManager`] — routes `(channel, chat, sender)` to a workspace (spec §4.5)

pub mod runner;
pub mod session;
pub mod workspace;

pub use runner::{AgentRunner, RunHandle, RunOutcome};
pub use session::{CompactionEngine, Session, SessionId};
pub use workspace::{Resolved, WorkspaceManager};
