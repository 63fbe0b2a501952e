//! [`PeerConnectionAdapter`] backed by the `webrtc` crate.

use crate::peer::{DataChannel, PeerConnectionAdapter, PeerEvent};
use crate::signaling::IceCandidate;
use crate::utils::{Result, SessionConfig, SessionError};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{mpsc, Mutex};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

impl From<RTCIceCandidateInit> for IceCandidate {
    fn from(init: RTCIceCandidateInit) -> Self {
        Self {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid,
            sdp_mline_index: init.sdp_mline_index,
            username_fragment: init.username_fragment,
        }
    }
}

impl From<IceCandidate> for RTCIceCandidateInit {
    fn from(candidate: IceCandidate) -> Self {
        Self {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        }
    }
}

/// WebRTC peer connection acting as the offering side
///
/// The data channel has to exist before the offer is created, otherwise the
/// SDP carries no application section. `create_offer` therefore provisions
/// the configured channel up front, and `create_data_channel` hands that same
/// channel back once the answer is in.
pub struct WebRtcPeer {
    pc: Arc<RTCPeerConnection>,
    label: String,
    channel: Mutex<Option<Arc<RTCDataChannel>>>,
    events_tx: mpsc::UnboundedSender<PeerEvent>,
    events_rx: StdMutex<Option<mpsc::UnboundedReceiver<PeerEvent>>>,
}

impl WebRtcPeer {
    /// Create a peer connection using the configured STUN servers
    pub async fn new(config: &SessionConfig) -> Result<Self> {
        let mut m = MediaEngine::default();
        m.register_default_codecs()?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut m)?;

        let api = APIBuilder::new()
            .with_media_engine(m)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers: Vec<RTCIceServer> = config
            .stun_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .collect();

        let pc = Arc::new(
            api.new_peer_connection(RTCConfiguration {
                ice_servers,
                ..Default::default()
            })
            .await?,
        );

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self::install_connection_handlers(&pc, events_tx.clone());

        Ok(Self {
            pc,
            label: config.channel_label.clone(),
            channel: Mutex::new(None),
            events_tx,
            events_rx: StdMutex::new(Some(events_rx)),
        })
    }

    fn install_connection_handlers(pc: &RTCPeerConnection, events_tx: mpsc::UnboundedSender<PeerEvent>) {
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let events_tx = events_tx.clone();
            Box::pin(async move {
                let event = match candidate {
                    Some(c) => match c.to_json() {
                        Ok(init) => PeerEvent::IceCandidate(Some(init.into())),
                        Err(e) => {
                            log::warn!("Dropping unserializable ICE candidate: {}", e);
                            return;
                        }
                    },
                    None => PeerEvent::IceCandidate(None),
                };
                let _ = events_tx.send(event);
            })
        }));

        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            Box::pin(async move {
                log::info!("Peer connection state: {}", state);
            })
        }));
    }

    async fn provision_channel(&self, label: &str, ordered: bool) -> Result<Arc<RTCDataChannel>> {
        let mut slot = self.channel.lock().await;
        if let Some(existing) = slot.as_ref() {
            if existing.label() == label {
                return Ok(existing.clone());
            }
        }

        let init = RTCDataChannelInit {
            ordered: Some(ordered),
            ..Default::default()
        };
        let dc = self.pc.create_data_channel(label, Some(init)).await?;
        log::debug!("Provisioned data channel '{}' (ordered: {})", label, ordered);

        let open_tx = self.events_tx.clone();
        dc.on_open(Box::new(move || {
            Box::pin(async move {
                let _ = open_tx.send(PeerEvent::ChannelOpen);
            })
        }));

        let close_tx = self.events_tx.clone();
        dc.on_close(Box::new(move || {
            let close_tx = close_tx.clone();
            Box::pin(async move {
                let _ = close_tx.send(PeerEvent::ChannelClosed);
            })
        }));

        let message_tx = self.events_tx.clone();
        dc.on_message(Box::new(move |msg: DataChannelMessage| {
            let message_tx = message_tx.clone();
            Box::pin(async move {
                let _ = message_tx.send(PeerEvent::Message(msg.data));
            })
        }));

        *slot = Some(dc.clone());
        Ok(dc)
    }
}

#[async_trait]
impl PeerConnectionAdapter for WebRtcPeer {
    async fn create_offer(&self) -> Result<String> {
        self.provision_channel(&self.label, true).await?;
        let offer = self.pc.create_offer(None).await?;
        Ok(offer.sdp)
    }

    async fn set_local_description(&self, sdp: &str) -> Result<()> {
        let offer = RTCSessionDescription::offer(sdp.to_string())?;
        self.pc.set_local_description(offer).await?;
        Ok(())
    }

    async fn set_remote_description(&self, sdp: &str) -> Result<()> {
        let answer = RTCSessionDescription::answer(sdp.to_string())?;
        self.pc.set_remote_description(answer).await?;
        Ok(())
    }

    async fn create_data_channel(
        &self,
        label: &str,
        ordered: bool,
    ) -> Result<Arc<dyn DataChannel>> {
        let dc = self.provision_channel(label, ordered).await?;
        Ok(Arc::new(WebRtcChannel {
            label: label.to_string(),
            dc,
        }))
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<PeerEvent>> {
        self.events_rx.lock().ok()?.take()
    }

    async fn close(&self) -> Result<()> {
        self.pc.close().await?;
        Ok(())
    }
}

struct WebRtcChannel {
    label: String,
    dc: Arc<RTCDataChannel>,
}

#[async_trait]
impl DataChannel for WebRtcChannel {
    fn label(&self) -> &str {
        &self.label
    }

    async fn send(&self, data: &[u8]) -> Result<()> {
        let written = self.dc.send(&Bytes::copy_from_slice(data)).await?;
        if written != data.len() {
            return Err(SessionError::Peer {
                reason: format!("short write: {} of {} bytes", written, data.len()),
            }
            .into());
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.dc.close().await?;
        Ok(())
    }
}
