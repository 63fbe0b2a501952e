//! Connection establishment.
//!
//! [`ConnectionOrchestrator::connect`] walks the session through
//! authentication, the offer/answer exchange and channel opening. A
//! background event pump owns the engine's event stream for the whole
//! session: it trickles local ICE candidates to the relay, reports channel
//! readiness to `connect()`, and hands inbound frames to the message layer.
//!
//! This endpoint always plays the offerer. The relay's HTTP reply to the
//! posted offer is taken as the remote answer.

use crate::crypto::{EncryptionCodec, SharedKey};
use crate::messaging::MessageService;
use crate::peer::{DataChannel, PeerConnectionAdapter, PeerEvent};
use crate::session::ChannelState;
use crate::signaling::{IceCandidate, SdpType, SignalingEnvelope, SignalingTransport};
use crate::utils::{CourierConfig, CourierError, MessagingConfig, Result, SessionError, SignalingError};
use bytes::Bytes;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Everything one session is configured with
#[derive(Clone)]
pub struct Session {
    /// Identifier used to correlate log lines
    pub id: Uuid,
    /// Relay endpoint
    pub signaling_url: String,
    /// Relay account name
    pub username: String,
    password: String,
    key: SharedKey,
    max_token_age: Option<Duration>,
    /// Label of the data channel
    pub channel_label: String,
    /// Bound on the wait for the channel to open
    pub channel_open_timeout: Duration,
}

impl Session {
    /// Build a session from configuration
    ///
    /// # Errors
    ///
    /// `ConfigError::MissingField` when no shared key is configured
    pub fn from_config(config: &CourierConfig) -> Result<Self> {
        Ok(Self::new(
            &config.signaling.url,
            &config.signaling.username,
            &config.signaling.password,
            config.shared_key()?,
        )
        .with_channel(
            &config.session.channel_label,
            config.session.channel_open_timeout(),
        )
        .with_max_token_age(config.crypto.max_token_age_secs.map(Duration::from_secs)))
    }

    /// Session with default channel settings
    pub fn new(signaling_url: &str, username: &str, password: &str, key: SharedKey) -> Self {
        Self {
            id: Uuid::new_v4(),
            signaling_url: signaling_url.to_string(),
            username: username.to_string(),
            password: password.to_string(),
            key,
            max_token_age: None,
            channel_label: crate::defaults::DEFAULT_CHANNEL_LABEL.to_string(),
            channel_open_timeout: Duration::from_secs(crate::defaults::DEFAULT_CHANNEL_OPEN_TIMEOUT),
        }
    }

    /// Override the channel label and open timeout
    pub fn with_channel(mut self, label: &str, open_timeout: Duration) -> Self {
        self.channel_label = label.to_string();
        self.channel_open_timeout = open_timeout;
        self
    }

    /// Reject inbound tokens older than `max_age`
    pub fn with_max_token_age(mut self, max_age: Option<Duration>) -> Self {
        self.max_token_age = max_age;
        self
    }

    fn short_id(&self) -> String {
        self.id.to_string()[..8].to_string()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("signaling_url", &self.signaling_url)
            .field("username", &self.username)
            .field("key", &self.key)
            .field("channel_label", &self.channel_label)
            .finish_non_exhaustive()
    }
}

/// State shared between the orchestrator, its event pump and the message layer
struct Shared {
    tag: String,
    state_tx: watch::Sender<ChannelState>,
    cancel: CancellationToken,
    channel: Mutex<Option<Arc<dyn DataChannel>>>,
    inbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Bytes>>>,
}

impl Shared {
    fn state(&self) -> ChannelState {
        *self.state_tx.borrow()
    }

    /// Apply `next` if legal; logs and returns whether it happened
    fn transition(&self, next: ChannelState) -> bool {
        let mut from = None;
        self.state_tx.send_if_modified(|state| {
            if state.can_transition_to(next) {
                from = Some(*state);
                *state = next;
                true
            } else {
                false
            }
        });

        match from {
            Some(from) => {
                log::info!("[session {}] {} -> {}", self.tag, from, next);
                true
            }
            None => false,
        }
    }

    fn take_channel(&self) -> Option<Arc<dyn DataChannel>> {
        self.channel.lock().ok().and_then(|mut slot| slot.take())
    }
}

/// Cheap handle the message layer uses to reach an open session
#[derive(Clone)]
pub struct SessionLink {
    shared: Arc<Shared>,
}

impl SessionLink {
    /// Current state
    pub fn state(&self) -> ChannelState {
        self.shared.state()
    }

    /// Watch state changes
    pub fn subscribe(&self) -> watch::Receiver<ChannelState> {
        self.shared.state_tx.subscribe()
    }

    /// The data channel, provided the session is open
    ///
    /// # Errors
    ///
    /// `SessionError::NotConnected` in any other state
    pub fn channel(&self) -> Result<Arc<dyn DataChannel>> {
        let state = self.state();
        if state != ChannelState::Open {
            return Err(SessionError::NotConnected {
                state: state.to_string(),
            }
            .into());
        }
        self.shared
            .channel
            .lock()
            .ok()
            .and_then(|slot| slot.clone())
            .ok_or_else(|| {
                SessionError::NotConnected {
                    state: state.to_string(),
                }
                .into()
            })
    }

    /// Inbound frames; only the first caller gets the receiver
    pub fn take_inbound(&self) -> Option<mpsc::UnboundedReceiver<Bytes>> {
        self.shared.inbound_rx.lock().ok()?.take()
    }
}

/// What the pump reports to a waiting `connect()`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChannelSignal {
    Pending,
    Open,
    Closed,
}

/// Drives one session from `Idle` to `Open`
pub struct ConnectionOrchestrator<S: SignalingTransport, P: PeerConnectionAdapter> {
    session: Session,
    signaling: Arc<S>,
    peer: Arc<P>,
    shared: Arc<Shared>,
    inbound_tx: mpsc::UnboundedSender<Bytes>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl<S: SignalingTransport, P: PeerConnectionAdapter> ConnectionOrchestrator<S, P> {
    /// Create an idle orchestrator
    pub fn new(session: Session, signaling: Arc<S>, peer: Arc<P>) -> Self {
        let (state_tx, _) = watch::channel(ChannelState::Idle);
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            tag: session.short_id(),
            state_tx,
            cancel: CancellationToken::new(),
            channel: Mutex::new(None),
            inbound_rx: Mutex::new(Some(inbound_rx)),
        });

        Self {
            session,
            signaling,
            peer,
            shared,
            inbound_tx,
            pump: Mutex::new(None),
        }
    }

    /// Session parameters
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Current state
    pub fn state(&self) -> ChannelState {
        self.shared.state()
    }

    /// Watch state changes
    pub fn subscribe(&self) -> watch::Receiver<ChannelState> {
        self.shared.state_tx.subscribe()
    }

    /// Handle for the message layer
    pub fn link(&self) -> SessionLink {
        SessionLink {
            shared: self.shared.clone(),
        }
    }

    /// Message service bound to this session's key and channel
    ///
    /// # Errors
    ///
    /// `SessionError::InvalidState` if a service was already created
    pub fn message_service(&self, config: &MessagingConfig) -> Result<MessageService> {
        let codec = EncryptionCodec::new(&self.session.key)?.with_max_age(self.session.max_token_age);
        MessageService::new(self.link(), codec, config)
    }

    /// Establish the session
    ///
    /// Returns once the data channel is open. Fatal errors leave the session
    /// `Failed` with its resources released; [`close`](Self::close) from
    /// another task aborts the attempt with `SignalingError::Cancelled`.
    pub async fn connect(&self) -> Result<()> {
        if !self.shared.transition(ChannelState::Authenticating) {
            return Err(SessionError::InvalidState {
                state: self.state().to_string(),
            }
            .into());
        }

        let result = tokio::select! {
            biased;
            _ = self.shared.cancel.cancelled() => Err(SignalingError::Cancelled.into()),
            result = self.establish() => result,
        };

        if let Err(e) = &result {
            self.fail(e).await;
        }
        result
    }

    async fn establish(&self) -> Result<()> {
        let credential = self.authenticate().await?;

        let events = self.peer.take_events().ok_or_else(|| SessionError::InvalidState {
            state: "peer event stream already taken".to_string(),
        })?;
        let (signal_tx, mut signal_rx) = watch::channel(ChannelSignal::Pending);
        self.spawn_pump(events, signal_tx, credential.clone());

        self.advance(ChannelState::OfferSent)?;
        let offer = self.peer.create_offer().await?;
        self.peer.set_local_description(&offer).await?;
        let reply = self
            .signaling
            .post_envelope(&SignalingEnvelope::offer(offer), credential.as_deref())
            .await?;

        self.advance(ChannelState::AnswerPending)?;
        let answer = extract_answer(reply)?;
        self.peer
            .set_remote_description(&answer)
            .await
            .map_err(|e| SignalingError::MalformedDescription {
                reason: e.to_string(),
            })?;

        let channel = self
            .peer
            .create_data_channel(&self.session.channel_label, true)
            .await?;
        if let Ok(mut slot) = self.shared.channel.lock() {
            *slot = Some(channel);
        }
        self.advance(ChannelState::IceExchanging)?;

        let timeout = self.session.channel_open_timeout;
        let signal = tokio::time::timeout(
            timeout,
            signal_rx.wait_for(|s| *s != ChannelSignal::Pending),
        )
        .await
        .map_err(|_| SessionError::ChannelTimeout {
            secs: timeout.as_secs(),
        })?
        .map(|s| *s)
        .map_err(|_| SessionError::Peer {
            reason: "event stream ended before the channel opened".to_string(),
        })?;

        if signal == ChannelSignal::Closed {
            return Err(SessionError::Peer {
                reason: "data channel closed before it opened".to_string(),
            }
            .into());
        }

        self.advance(ChannelState::Open)
    }

    async fn authenticate(&self) -> Result<Option<String>> {
        let request = SignalingEnvelope::auth(&self.session.username, &self.session.password);
        let reply = self
            .signaling
            .post_envelope(&request, None)
            .await
            .map_err(|e| match e {
                CourierError::Signaling(SignalingError::Http { status, body }) => {
                    SignalingError::Authentication { status, body }.into()
                }
                other => other,
            })?;

        let token = match reply {
            Some(SignalingEnvelope::AuthGranted { token }) => Some(token),
            _ => {
                log::debug!("[session {}] Relay accepted credentials without issuing a token", self.shared.tag);
                None
            }
        };

        Ok(token)
    }

    fn advance(&self, next: ChannelState) -> Result<()> {
        if self.shared.transition(next) {
            Ok(())
        } else {
            Err(SessionError::InvalidState {
                state: format!("cannot move from {} to {}", self.state(), next),
            }
            .into())
        }
    }

    fn spawn_pump(
        &self,
        events: mpsc::UnboundedReceiver<PeerEvent>,
        signal_tx: watch::Sender<ChannelSignal>,
        credential: Option<String>,
    ) {
        let pump = EventPump {
            shared: self.shared.clone(),
            signaling: self.signaling.clone(),
            peer: self.peer.clone(),
            inbound_tx: self.inbound_tx.clone(),
            signal_tx,
            credential,
        };
        let handle = tokio::spawn(pump.run(events));
        if let Ok(mut slot) = self.pump.lock() {
            *slot = Some(handle);
        }
    }

    async fn fail(&self, err: &CourierError) {
        if self.shared.transition(ChannelState::Failed) {
            log::error!("[session {}] Connection failed: {}", self.shared.tag, err);
            release(&self.shared, self.peer.as_ref()).await;
        }
    }

    /// Close the session
    ///
    /// Cancels in-flight signaling and releases the engine. Only the first
    /// call on a live session has any effect.
    pub async fn close(&self) -> Result<()> {
        if !self.shared.transition(ChannelState::Closed) {
            log::debug!(
                "[session {}] close() ignored, session already {}",
                self.shared.tag,
                self.state()
            );
            return Ok(());
        }
        release(&self.shared, self.peer.as_ref()).await;
        Ok(())
    }
}

impl<S: SignalingTransport, P: PeerConnectionAdapter> Drop for ConnectionOrchestrator<S, P> {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
        if let Ok(mut slot) = self.pump.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
    }
}

/// Cancel everything still running and shut the engine down
async fn release<P: PeerConnectionAdapter>(shared: &Shared, peer: &P) {
    shared.cancel.cancel();

    if let Some(channel) = shared.take_channel() {
        if let Err(e) = channel.close().await {
            log::warn!("[session {}] Closing data channel failed: {}", shared.tag, e);
        }
    }
    if let Err(e) = peer.close().await {
        log::warn!("[session {}] Closing peer connection failed: {}", shared.tag, e);
    }
}

fn extract_answer(reply: Option<SignalingEnvelope>) -> Result<String> {
    let reason = match reply {
        Some(SignalingEnvelope::SessionDescription {
            sdp,
            sdp_type: SdpType::Answer,
        }) => {
            if sdp.trim_start().starts_with("v=") {
                return Ok(sdp);
            }
            "answer body is not SDP".to_string()
        }
        Some(SignalingEnvelope::SessionDescription {
            sdp_type: SdpType::Offer,
            ..
        }) => "relay replied with an offer, expected an answer".to_string(),
        Some(other) => format!("expected an answer, relay replied with {}", other.kind()),
        None => "relay reply carried no session description".to_string(),
    };
    Err(SignalingError::MalformedDescription { reason }.into())
}

/// Owns the engine's event stream for the lifetime of a session
struct EventPump<S, P> {
    shared: Arc<Shared>,
    signaling: Arc<S>,
    peer: Arc<P>,
    inbound_tx: mpsc::UnboundedSender<Bytes>,
    signal_tx: watch::Sender<ChannelSignal>,
    credential: Option<String>,
}

impl<S: SignalingTransport, P: PeerConnectionAdapter> EventPump<S, P> {
    async fn run(self, mut events: mpsc::UnboundedReceiver<PeerEvent>) {
        let mut state_rx = self.shared.state_tx.subscribe();
        // Candidates found before the answer is applied wait here.
        let mut held: Vec<IceCandidate> = Vec::new();

        loop {
            tokio::select! {
                _ = self.shared.cancel.cancelled() => break,
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    if self.trickling() {
                        for candidate in held.drain(..) {
                            self.forward(candidate);
                        }
                    }
                }
                event = events.recv() => {
                    let Some(event) = event else {
                        log::debug!("[session {}] Peer event stream ended", self.shared.tag);
                        break;
                    };
                    match event {
                        PeerEvent::IceCandidate(Some(candidate)) => {
                            if self.trickling() {
                                self.forward(candidate);
                            } else {
                                held.push(candidate);
                            }
                        }
                        PeerEvent::IceCandidate(None) => {
                            log::debug!("[session {}] ICE gathering complete", self.shared.tag);
                        }
                        PeerEvent::ChannelOpen => {
                            self.signal_tx.send_replace(ChannelSignal::Open);
                        }
                        PeerEvent::ChannelClosed => {
                            self.signal_tx.send_replace(ChannelSignal::Closed);
                            if self.shared.state() == ChannelState::Open
                                && self.shared.transition(ChannelState::Closed)
                            {
                                log::info!("[session {}] Remote side closed the channel", self.shared.tag);
                                release(&self.shared, self.peer.as_ref()).await;
                                break;
                            }
                        }
                        PeerEvent::Message(frame) => {
                            if self.inbound_tx.send(frame).is_err() {
                                log::debug!("[session {}] Inbound frame dropped, no receiver", self.shared.tag);
                            }
                        }
                    }
                }
            }
        }
    }

    fn trickling(&self) -> bool {
        matches!(
            self.shared.state(),
            ChannelState::IceExchanging | ChannelState::Open
        )
    }

    /// Fire-and-forget candidate notification; failures are only logged
    fn forward(&self, candidate: IceCandidate) {
        let signaling = self.signaling.clone();
        let cancel = self.shared.cancel.clone();
        let credential = self.credential.clone();
        let tag = self.shared.tag.clone();

        tokio::spawn(async move {
            let envelope = SignalingEnvelope::ice(candidate);
            tokio::select! {
                _ = cancel.cancelled() => {
                    log::debug!("[session {}] Candidate relay cancelled", tag);
                }
                result = signaling.post_envelope(&envelope, credential.as_deref()) => {
                    match result {
                        Ok(_) => log::debug!("[session {}] Candidate relayed", tag),
                        Err(e) => log::warn!("[session {}] Candidate relay failed (non-fatal): {}", tag, e),
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{host_candidate, MockPeer, MockSignaling, RelayReply};
    use crate::utils::CryptoError;
    use tokio_test::assert_ok;

    fn session() -> Session {
        Session::new("http://relay.test/signal", "alice", "hunter2", SharedKey::generate())
            .with_channel("chat", Duration::from_secs(5))
    }

    fn orchestrator(
        signaling: MockSignaling,
        peer: MockPeer,
    ) -> (
        ConnectionOrchestrator<MockSignaling, MockPeer>,
        Arc<MockSignaling>,
        Arc<MockPeer>,
    ) {
        let signaling = Arc::new(signaling);
        let peer = Arc::new(peer);
        (
            ConnectionOrchestrator::new(session(), signaling.clone(), peer.clone()),
            signaling,
            peer,
        )
    }

    /// Let spawned tasks run to quiescence
    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_auth_rejection_fails_before_offer() {
        let signaling = MockSignaling::new().with_auth(RelayReply::Status(401, "nope"));
        let (orch, signaling, peer) = orchestrator(signaling, MockPeer::new());

        let err = orch.connect().await.unwrap_err();
        assert!(matches!(
            err,
            CourierError::Signaling(SignalingError::Authentication { status: 401, .. })
        ));
        assert_eq!(orch.state(), ChannelState::Failed);
        assert_eq!(peer.offers_created(), 0);
        assert_eq!(signaling.kinds(), vec!["auth"]);
        assert!(peer.is_closed());
    }

    #[tokio::test]
    async fn test_connect_reaches_open_and_sends_hello() {
        let peer = MockPeer::new().with_candidates(vec![host_candidate(1), host_candidate(2)]);
        let (orch, signaling, peer) = orchestrator(MockSignaling::new(), peer);

        let mut states = orch.subscribe();
        assert_ok!(orch.connect().await);
        assert_eq!(orch.state(), ChannelState::Open);
        assert!(states.has_changed().unwrap());

        let service = orch.message_service(&MessagingConfig::default()).unwrap();
        service.send_message("hello").await.unwrap();

        let sent = peer.sent();
        assert_eq!(sent.len(), 1);
        let codec = EncryptionCodec::new(&orch.session().key).unwrap();
        let frame = crate::messaging::Frame::decode(&codec.decrypt(&sent[0]).unwrap()).unwrap();
        assert!(frame.chunk.is_none());
        assert_eq!(
            crate::messaging::MessageBody::decode(&frame.payload).unwrap(),
            crate::messaging::MessageBody::Text("hello".to_string())
        );

        settle().await;
        let kinds = signaling.kinds();
        assert_eq!(&kinds[..2], &["auth", "offer"]);
        assert_eq!(kinds.iter().filter(|k| **k == "ice").count(), 2);
    }

    #[tokio::test]
    async fn test_token_is_used_as_bearer_credential() {
        let signaling = MockSignaling::new().with_auth(RelayReply::Token("sess-42"));
        let peer = MockPeer::new().with_candidates(vec![host_candidate(1)]);
        let (orch, signaling, _peer) = orchestrator(signaling, peer);

        orch.connect().await.unwrap();
        settle().await;

        let credentials = signaling.credentials();
        assert_eq!(credentials[0], None);
        assert!(credentials[1..].iter().all(|c| c.as_deref() == Some("sess-42")));
        assert!(credentials.len() >= 3);
    }

    #[tokio::test]
    async fn test_candidates_wait_for_the_answer() {
        let peer = MockPeer::new().with_candidates(vec![host_candidate(1)]);
        let (orch, signaling, _peer) = orchestrator(MockSignaling::new(), peer);

        orch.connect().await.unwrap();
        settle().await;

        let kinds = signaling.kinds();
        let offer_at = kinds.iter().position(|k| *k == "offer").unwrap();
        let ice_at = kinds.iter().position(|k| *k == "ice").unwrap();
        assert!(ice_at > offer_at);
    }

    #[tokio::test]
    async fn test_candidate_relay_failures_are_not_fatal() {
        let signaling = MockSignaling::new().with_ice(RelayReply::Status(500, "boom"));
        let peer = MockPeer::new().with_candidates(vec![host_candidate(1), host_candidate(2)]);
        let (orch, signaling, _peer) = orchestrator(signaling, peer);

        orch.connect().await.unwrap();
        settle().await;

        assert_eq!(orch.state(), ChannelState::Open);
        assert_eq!(signaling.kinds().iter().filter(|k| **k == "ice").count(), 2);
    }

    #[tokio::test]
    async fn test_offer_rejection_is_fatal() {
        let signaling = MockSignaling::new().with_offer(RelayReply::Status(503, "down"));
        let (orch, _signaling, peer) = orchestrator(signaling, MockPeer::new());

        let err = orch.connect().await.unwrap_err();
        assert!(matches!(
            err,
            CourierError::Signaling(SignalingError::Http { status: 503, .. })
        ));
        assert_eq!(orch.state(), ChannelState::Failed);
        assert!(peer.is_closed());
    }

    #[tokio::test]
    async fn test_malformed_answer_fails() {
        for reply in [
            RelayReply::Empty,
            RelayReply::Envelope(SignalingEnvelope::answer("hello there")),
            RelayReply::Envelope(SignalingEnvelope::offer("v=0\r\n")),
        ] {
            let signaling = MockSignaling::new().with_offer(reply);
            let (orch, _signaling, peer) = orchestrator(signaling, MockPeer::new());

            let err = orch.connect().await.unwrap_err();
            assert!(matches!(
                err,
                CourierError::Signaling(SignalingError::MalformedDescription { .. })
            ));
            assert_eq!(orch.state(), ChannelState::Failed);
            assert_eq!(peer.remote_descriptions(), 0);
        }
    }

    #[tokio::test]
    async fn test_engine_rejecting_answer_is_malformed() {
        let peer = MockPeer::new().rejecting_remote_description();
        let (orch, _signaling, _peer) = orchestrator(MockSignaling::new(), peer);

        let err = orch.connect().await.unwrap_err();
        assert!(matches!(
            err,
            CourierError::Signaling(SignalingError::MalformedDescription { .. })
        ));
        assert_eq!(orch.state(), ChannelState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_channel_open_timeout() {
        let peer = MockPeer::new().never_opening();
        let (orch, _signaling, peer) = orchestrator(MockSignaling::new(), peer);

        let err = orch.connect().await.unwrap_err();
        assert!(matches!(
            err,
            CourierError::Session(SessionError::ChannelTimeout { secs: 5 })
        ));
        assert_eq!(orch.state(), ChannelState::Failed);
        assert!(peer.is_closed());
    }

    #[tokio::test]
    async fn test_connect_twice_is_rejected() {
        let (orch, _signaling, _peer) = orchestrator(MockSignaling::new(), MockPeer::new());
        orch.connect().await.unwrap();

        let err = orch.connect().await.unwrap_err();
        assert!(matches!(err, CourierError::Session(SessionError::InvalidState { .. })));
        assert_eq!(orch.state(), ChannelState::Open);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_cancels_pending_relay() {
        let signaling = MockSignaling::new().with_ice(RelayReply::Hang);
        let peer = MockPeer::new().with_candidates(vec![host_candidate(1)]);
        let (orch, signaling, peer) = orchestrator(signaling, peer);

        orch.connect().await.unwrap();
        settle().await;
        assert_eq!(signaling.in_flight(), 1);

        let mut states = orch.subscribe();
        states.borrow_and_update();

        orch.close().await.unwrap();
        orch.close().await.unwrap();
        settle().await;

        assert_eq!(orch.state(), ChannelState::Closed);
        assert_eq!(signaling.in_flight(), 0);
        assert!(peer.is_closed());
        assert_eq!(peer.close_calls(), 1);

        // exactly one transition was published
        assert!(states.has_changed().unwrap());
        states.borrow_and_update();
        assert!(!states.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_close_during_connect_cancels_it() {
        let signaling = MockSignaling::new().with_offer(RelayReply::Hang);
        let (orch, signaling, _peer) = orchestrator(signaling, MockPeer::new());
        let orch = Arc::new(orch);

        let connecting = {
            let orch = orch.clone();
            tokio::spawn(async move { orch.connect().await })
        };
        while signaling.in_flight() == 0 {
            tokio::task::yield_now().await;
        }

        orch.close().await.unwrap();
        let err = connecting.await.unwrap().unwrap_err();
        assert!(matches!(err, CourierError::Signaling(SignalingError::Cancelled)));
        assert_eq!(orch.state(), ChannelState::Closed);
        assert_eq!(signaling.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_channel_closing_before_open_fails_connect() {
        let (orch, _signaling, peer) = orchestrator(MockSignaling::new(), MockPeer::new().never_opening());
        let orch = Arc::new(orch);

        let mut states = orch.subscribe();
        let connecting = {
            let orch = orch.clone();
            tokio::spawn(async move { orch.connect().await })
        };
        states
            .wait_for(|s| *s == ChannelState::IceExchanging)
            .await
            .unwrap();

        peer.remote_close();
        let err = connecting.await.unwrap().unwrap_err();
        assert!(matches!(err, CourierError::Session(SessionError::Peer { .. })));
        assert_eq!(orch.state(), ChannelState::Failed);
        assert_eq!(peer.channel_close_calls(), 1);
        assert!(peer.is_closed());
    }

    #[tokio::test]
    async fn test_remote_close_moves_open_session_to_closed() {
        let (orch, _signaling, peer) = orchestrator(MockSignaling::new(), MockPeer::new());
        orch.connect().await.unwrap();

        let mut states = orch.subscribe();
        peer.remote_close();
        let state = *states.wait_for(|s| s.is_terminal()).await.unwrap();
        assert_eq!(state, ChannelState::Closed);
        assert!(orch.link().channel().is_err());
    }

    #[tokio::test]
    async fn test_send_before_open_is_not_connected() {
        let (orch, _signaling, _peer) = orchestrator(MockSignaling::new(), MockPeer::new());
        let service = orch.message_service(&MessagingConfig::default()).unwrap();

        let err = service.send_message("too early").await.unwrap_err();
        assert!(matches!(err, CourierError::Session(SessionError::NotConnected { .. })));
    }

    #[tokio::test]
    async fn test_decrypt_failure_keeps_session_open() {
        let (orch, _signaling, peer) = orchestrator(MockSignaling::new(), MockPeer::new());
        orch.connect().await.unwrap();
        let service = orch.message_service(&MessagingConfig::default()).unwrap();

        peer.deliver(b"definitely not a token".to_vec());
        let err = service.recv().await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            CourierError::Crypto(CryptoError::AuthenticationTag { .. })
        ));
        assert_eq!(orch.state(), ChannelState::Open);
    }
}
