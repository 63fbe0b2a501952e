//! Peer-connection engine interface.
//!
//! The engine's callbacks (candidate discovered, channel opened, frame
//! arrived) are delivered as [`PeerEvent`]s over one channel, which the
//! session's control loop takes ownership of with
//! [`PeerConnectionAdapter::take_events`].

pub mod webrtc_peer;

pub use webrtc_peer::WebRtcPeer;

use crate::signaling::IceCandidate;
use crate::utils::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Something the engine observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// A local candidate; `None` marks the end of gathering
    IceCandidate(Option<IceCandidate>),
    /// The data channel is ready for traffic
    ChannelOpen,
    /// The data channel was closed by either side
    ChannelClosed,
    /// One inbound frame, in arrival order
    Message(Bytes),
}

/// Handle to an open (or opening) data channel
#[async_trait]
pub trait DataChannel: Send + Sync {
    /// Channel label
    fn label(&self) -> &str;

    /// Send one frame
    async fn send(&self, data: &[u8]) -> Result<()>;

    /// Close the channel
    async fn close(&self) -> Result<()>;
}

/// Operations the session needs from the peer-connection engine
#[async_trait]
pub trait PeerConnectionAdapter: Send + Sync + 'static {
    /// Create a local offer and return its SDP
    async fn create_offer(&self) -> Result<String>;

    /// Apply our own offer
    async fn set_local_description(&self, sdp: &str) -> Result<()>;

    /// Apply the remote answer
    async fn set_remote_description(&self, sdp: &str) -> Result<()>;

    /// Open (or return the already provisioned) data channel named `label`
    async fn create_data_channel(&self, label: &str, ordered: bool)
        -> Result<Arc<dyn DataChannel>>;

    /// Take the event stream; only the first call gets it
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<PeerEvent>>;

    /// Tear down the connection and release engine resources
    async fn close(&self) -> Result<()>;
}
