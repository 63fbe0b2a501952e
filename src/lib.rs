//! # p2p-courier
//!
//! Encrypted peer-to-peer text and file exchange between two endpoints that
//! negotiate a WebRTC data channel through an HTTP signaling relay.
//!
//! ## Features
//!
//! - **Authenticated Encryption**: every frame is sealed with ChaCha20-Poly1305
//!   under a pre-shared key
//! - **Relay Signaling**: authentication, offer/answer and trickled ICE over
//!   plain HTTP POSTs
//! - **Chunked Transfers**: large files are split into independently sealed
//!   frames and reassembled on arrival
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use p2p_courier::{App, CourierConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = CourierConfig::load(None)?;
//!     let mut app = App::new(config).await?;
//!     app.connect().await?;
//!     app.send_message("hello").await?;
//!     app.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`crypto`]: the shared key and the token codec
//! - [`signaling`]: relay envelopes and the HTTP transport
//! - [`peer`]: the peer-connection engine interface and its WebRTC adapter
//! - [`session`]: the connection state machine
//! - [`messaging`]: framing, chunking and delivery over an open channel
//! - [`utils`]: configuration and error handling

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod app;
pub mod crypto;
pub mod messaging;
pub mod peer;
pub mod session;
pub mod signaling;
pub mod utils;

#[cfg(test)]
mod testing;

// Re-export commonly used types for convenience
pub use app::{App, AppEvent};
pub use crypto::{EncryptionCodec, SharedKey};
pub use messaging::{InboundMessage, MessageService};
pub use session::{ChannelState, ConnectionOrchestrator, Session};
pub use signaling::{HttpSignaling, SignalingEnvelope, SignalingTransport};
pub use utils::{CourierConfig, CourierError, Result};

/// Maximum reassembled message size in bytes (64MB)
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Default configuration values
pub mod defaults {
    /// Default signaling request timeout in seconds
    pub const DEFAULT_REQUEST_TIMEOUT: u64 = 10;

    /// Default data channel label
    pub const DEFAULT_CHANNEL_LABEL: &str = "chat";

    /// Default wait for the data channel to open, in seconds
    pub const DEFAULT_CHANNEL_OPEN_TIMEOUT: u64 = 30;

    /// Default largest frame on the wire (16KB)
    pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024;

    /// Default number of partial messages held for reassembly
    pub const DEFAULT_MAX_PENDING_MESSAGES: usize = 64;
}
