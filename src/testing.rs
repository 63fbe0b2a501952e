//! Scriptable in-memory relay and peer for tests.

use crate::peer::{DataChannel, PeerConnectionAdapter, PeerEvent};
use crate::signaling::{IceCandidate, SignalingEnvelope, SignalingTransport};
use crate::utils::{Result, SessionError, SignalingError};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Minimal answer accepted by the orchestrator
pub const MOCK_ANSWER_SDP: &str = "v=0\r\no=- 1 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\nm=application 9 UDP/DTLS/SCTP webrtc-datachannel\r\n";

/// How the mock relay answers one kind of request
#[derive(Debug, Clone)]
pub enum RelayReply {
    /// 2xx with no envelope
    Empty,
    /// 2xx carrying `{token}`
    Token(&'static str),
    /// 2xx carrying this envelope
    Envelope(SignalingEnvelope),
    /// Non-2xx status with body
    Status(u16, &'static str),
    /// Never completes
    Hang,
}

impl RelayReply {
    async fn play(self) -> Result<Option<SignalingEnvelope>> {
        match self {
            Self::Empty => Ok(None),
            Self::Token(token) => Ok(Some(SignalingEnvelope::AuthGranted {
                token: token.to_string(),
            })),
            Self::Envelope(envelope) => Ok(Some(envelope)),
            Self::Status(status, body) => Err(SignalingError::Http {
                status,
                body: body.to_string(),
            }
            .into()),
            Self::Hang => std::future::pending().await,
        }
    }
}

struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Relay double that records every request
pub struct MockSignaling {
    auth: RelayReply,
    offer: RelayReply,
    ice: RelayReply,
    requests: Mutex<Vec<(SignalingEnvelope, Option<String>)>>,
    in_flight: Arc<AtomicUsize>,
}

impl MockSignaling {
    /// Relay that accepts everything and answers the offer
    pub fn new() -> Self {
        Self {
            auth: RelayReply::Empty,
            offer: RelayReply::Envelope(SignalingEnvelope::answer(MOCK_ANSWER_SDP)),
            ice: RelayReply::Empty,
            requests: Mutex::new(Vec::new()),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_auth(mut self, reply: RelayReply) -> Self {
        self.auth = reply;
        self
    }

    pub fn with_offer(mut self, reply: RelayReply) -> Self {
        self.offer = reply;
        self
    }

    pub fn with_ice(mut self, reply: RelayReply) -> Self {
        self.ice = reply;
        self
    }

    /// Kinds of the requests received so far, in order
    pub fn kinds(&self) -> Vec<&'static str> {
        self.requests.lock().unwrap().iter().map(|(e, _)| e.kind()).collect()
    }

    /// Bearer credential of each request, in order
    pub fn credentials(&self) -> Vec<Option<String>> {
        self.requests.lock().unwrap().iter().map(|(_, c)| c.clone()).collect()
    }

    /// Requests that have started but not yet completed or been dropped
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SignalingTransport for MockSignaling {
    async fn post_envelope(
        &self,
        envelope: &SignalingEnvelope,
        credential: Option<&str>,
    ) -> Result<Option<SignalingEnvelope>> {
        self.requests
            .lock()
            .unwrap()
            .push((envelope.clone(), credential.map(str::to_string)));

        let reply = match envelope {
            SignalingEnvelope::AuthRequest { .. } => self.auth.clone(),
            SignalingEnvelope::SessionDescription { .. } => self.offer.clone(),
            SignalingEnvelope::IceCandidate { .. } => self.ice.clone(),
            SignalingEnvelope::AuthGranted { .. } => RelayReply::Empty,
        };

        let _guard = InFlight::enter(&self.in_flight);
        reply.play().await
    }
}

/// Channel handle that records outgoing frames
struct MockChannel {
    label: String,
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl DataChannel for MockChannel {
    fn label(&self) -> &str {
        &self.label
    }

    async fn send(&self, data: &[u8]) -> Result<()> {
        self.sent.lock().unwrap().push(data.to_vec());
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Engine double driven through [`PeerEvent`]s
pub struct MockPeer {
    events_tx: mpsc::UnboundedSender<PeerEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<PeerEvent>>>,
    candidates: Vec<IceCandidate>,
    open_on_create: bool,
    reject_remote: bool,
    offers: AtomicUsize,
    remotes: AtomicUsize,
    closes: AtomicUsize,
    closed: AtomicBool,
    channel_closes: Arc<AtomicUsize>,
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl MockPeer {
    /// Peer that opens its channel as soon as it is created
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            candidates: Vec::new(),
            open_on_create: true,
            reject_remote: false,
            offers: AtomicUsize::new(0),
            remotes: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            channel_closes: Arc::new(AtomicUsize::new(0)),
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Candidates reported once the local description is set
    pub fn with_candidates(mut self, candidates: Vec<IceCandidate>) -> Self {
        self.candidates = candidates;
        self
    }

    /// Channel never reports open
    pub fn never_opening(mut self) -> Self {
        self.open_on_create = false;
        self
    }

    /// Every remote description is rejected
    pub fn rejecting_remote_description(mut self) -> Self {
        self.reject_remote = true;
        self
    }

    pub fn offers_created(&self) -> usize {
        self.offers.load(Ordering::SeqCst)
    }

    pub fn remote_descriptions(&self) -> usize {
        self.remotes.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Times the data channel handed out by this peer was closed
    pub fn channel_close_calls(&self) -> usize {
        self.channel_closes.load(Ordering::SeqCst)
    }

    /// Frames handed to the channel so far
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().unwrap().clone()
    }

    /// Simulate a frame arriving from the remote side
    pub fn deliver(&self, frame: Vec<u8>) {
        let _ = self.events_tx.send(PeerEvent::Message(Bytes::from(frame)));
    }

    /// Simulate the remote side closing the channel
    pub fn remote_close(&self) {
        let _ = self.events_tx.send(PeerEvent::ChannelClosed);
    }
}

#[async_trait]
impl PeerConnectionAdapter for MockPeer {
    async fn create_offer(&self) -> Result<String> {
        self.offers.fetch_add(1, Ordering::SeqCst);
        Ok("v=0\r\no=- 3 4 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n".to_string())
    }

    async fn set_local_description(&self, _sdp: &str) -> Result<()> {
        for candidate in &self.candidates {
            let _ = self.events_tx.send(PeerEvent::IceCandidate(Some(candidate.clone())));
        }
        let _ = self.events_tx.send(PeerEvent::IceCandidate(None));
        Ok(())
    }

    async fn set_remote_description(&self, _sdp: &str) -> Result<()> {
        if self.reject_remote {
            return Err(SessionError::Peer {
                reason: "remote description rejected".to_string(),
            }
            .into());
        }
        self.remotes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn create_data_channel(&self, label: &str, _ordered: bool) -> Result<Arc<dyn DataChannel>> {
        if self.open_on_create {
            let _ = self.events_tx.send(PeerEvent::ChannelOpen);
        }
        Ok(Arc::new(MockChannel {
            label: label.to_string(),
            sent: self.sent.clone(),
            closes: self.channel_closes.clone(),
        }))
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<PeerEvent>> {
        self.events_rx.lock().unwrap().take()
    }

    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Host candidate number `n`
pub fn host_candidate(n: u8) -> IceCandidate {
    IceCandidate {
        candidate: format!("candidate:{n} 1 udp 2122260223 192.168.1.{n} 5000{n} typ host"),
        sdp_mid: Some("0".to_string()),
        sdp_mline_index: Some(0),
        username_fragment: None,
    }
}
