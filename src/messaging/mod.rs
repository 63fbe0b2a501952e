//! Message framing, chunking and delivery.
//!
//! Every message is encoded as a [`MessageBody`], split into [`Frame`]s that
//! fit the configured wire size, and each frame is sealed as its own token.

pub mod frame;
pub mod reassembly;
pub mod service;

pub use frame::{ChunkHeader, Frame, MessageBody, FRAME_OVERHEAD};
pub use reassembly::Reassembler;
pub use service::{InboundMessage, MessageService};
