//! Signaling relay access.
//!
//! A [`SignalingTransport`] posts one envelope and hands back whatever
//! envelope the relay replied with. It keeps no session state of its own:
//! the bearer credential obtained during authentication is passed in by the
//! caller on every request.

pub mod envelope;
pub mod http;

pub use envelope::*;
pub use http::HttpSignaling;

use crate::utils::Result;
use async_trait::async_trait;

/// Request/response exchange with the signaling relay
#[async_trait]
pub trait SignalingTransport: Send + Sync + 'static {
    /// Post `envelope` to the relay
    ///
    /// Returns the relay's reply, or `None` when the success body carried no
    /// envelope.
    ///
    /// # Errors
    ///
    /// `SignalingError::Http` on a non-2xx status, `SignalingError::Network`
    /// when no response arrived
    async fn post_envelope(
        &self,
        envelope: &SignalingEnvelope,
        credential: Option<&str>,
    ) -> Result<Option<SignalingEnvelope>>;
}
