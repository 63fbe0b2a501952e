//! Session establishment and lifecycle.

pub mod orchestrator;
pub mod state;

pub use orchestrator::{ConnectionOrchestrator, Session, SessionLink};
pub use state::ChannelState;
