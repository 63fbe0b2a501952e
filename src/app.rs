//! Application lifecycle and coordination.
//!
//! [`App`] wires configuration, the signaling relay, the peer-connection
//! engine and the message service into one session, and reports what
//! happens on it as [`AppEvent`]s.

use crate::{
    messaging::{InboundMessage, MessageService},
    peer::{PeerConnectionAdapter, WebRtcPeer},
    session::{ChannelState, ConnectionOrchestrator, Session},
    signaling::{HttpSignaling, SignalingTransport},
    utils::{CourierConfig, CourierError, Result},
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Name used when a sender's file name has no usable component
const FALLBACK_FILE_NAME: &str = "received.bin";

/// Main application structure
pub struct App<S: SignalingTransport = HttpSignaling, P: PeerConnectionAdapter = WebRtcPeer> {
    /// Application configuration
    config: CourierConfig,
    /// Connection state machine
    orchestrator: Arc<ConnectionOrchestrator<S, P>>,
    /// Messaging on top of the open channel
    service: Arc<MessageService>,
    /// Application event channels
    event_sender: mpsc::UnboundedSender<AppEvent>,
    event_receiver: mpsc::UnboundedReceiver<AppEvent>,
    receiver_task: Option<JoinHandle<()>>,
}

/// Application events
#[derive(Debug, Clone)]
pub enum AppEvent {
    /// Data channel is open
    Connected {
        session_id: Uuid,
    },
    /// Text message received
    MessageReceived {
        text: String,
    },
    /// File received and written to disk
    FileReceived {
        name: String,
        path: PathBuf,
        size: usize,
    },
    /// An inbound frame was dropped
    Error {
        error: CourierError,
    },
    /// Session ended
    Disconnected {
        state: ChannelState,
    },
}

impl App {
    /// Create an application talking to the configured relay over WebRTC
    pub async fn new(config: CourierConfig) -> Result<Self> {
        let signaling = HttpSignaling::new(&config.signaling)?;
        let peer = WebRtcPeer::new(&config.session).await?;
        Self::with_transports(config, signaling, peer)
    }
}

impl<S: SignalingTransport, P: PeerConnectionAdapter> App<S, P> {
    /// Create an application over the given relay and engine
    pub fn with_transports(config: CourierConfig, signaling: S, peer: P) -> Result<Self> {
        config.validate()?;

        let session = Session::from_config(&config)?;
        let orchestrator = Arc::new(ConnectionOrchestrator::new(
            session,
            Arc::new(signaling),
            Arc::new(peer),
        ));
        let service = Arc::new(orchestrator.message_service(&config.messaging)?);

        let (event_sender, event_receiver) = mpsc::unbounded_channel();

        Ok(Self {
            config,
            orchestrator,
            service,
            event_sender,
            event_receiver,
            receiver_task: None,
        })
    }

    /// Current session state
    pub fn state(&self) -> ChannelState {
        self.orchestrator.state()
    }

    /// Session id used in log lines
    pub fn session_id(&self) -> Uuid {
        self.orchestrator.session().id
    }

    /// Connect to the peer and start receiving
    pub async fn connect(&mut self) -> Result<()> {
        log::info!("Connecting via {}", self.config.signaling.url);
        log::info!(
            "Shared key fingerprint: {}",
            self.config.shared_key()?.fingerprint()
        );

        self.orchestrator.connect().await?;

        let _ = self.event_sender.send(AppEvent::Connected {
            session_id: self.session_id(),
        });

        let receiver = Receiver {
            service: self.service.clone(),
            download_dir: self.config.storage.download_dir.clone(),
            events: self.event_sender.clone(),
        };
        let mut state = self.orchestrator.subscribe();
        self.receiver_task = Some(tokio::spawn(async move {
            receiver.run().await;
            let final_state = *state.borrow_and_update();
            let _ = receiver.events.send(AppEvent::Disconnected { state: final_state });
        }));

        Ok(())
    }

    /// Next application event; `None` once the app is dropped
    pub async fn next_event(&mut self) -> Option<AppEvent> {
        self.event_receiver.recv().await
    }

    /// Send a text message
    pub async fn send_message(&self, text: &str) -> Result<()> {
        self.service.send_message(text).await
    }

    /// Send a file
    pub async fn send_file<T: AsRef<Path>>(&self, path: T) -> Result<()> {
        self.service.send_file(path).await
    }

    /// Shutdown the application gracefully
    pub async fn shutdown(mut self) -> Result<()> {
        log::info!("Shutting down application");
        self.orchestrator.close().await?;
        if let Some(task) = self.receiver_task.take() {
            if let Err(e) = task.await {
                log::warn!("Receiver task ended abnormally: {}", e);
            }
        }
        Ok(())
    }
}

/// Turns inbound messages into events
struct Receiver {
    service: Arc<MessageService>,
    download_dir: PathBuf,
    events: mpsc::UnboundedSender<AppEvent>,
}

impl Receiver {
    async fn run(&self) {
        while let Some(item) = self.service.recv().await {
            let event = match item {
                Ok(InboundMessage::Text(text)) => AppEvent::MessageReceived { text },
                Ok(InboundMessage::File { name, data }) => {
                    match save_file(&self.download_dir, &name, &data).await {
                        Ok(path) => {
                            log::info!("Saved {} ({} bytes) to {}", name, data.len(), path.display());
                            AppEvent::FileReceived {
                                name,
                                path,
                                size: data.len(),
                            }
                        }
                        Err(error) => {
                            log::error!("Could not save received file {}: {}", name, error);
                            AppEvent::Error { error }
                        }
                    }
                }
                Err(error) => {
                    if error.is_security_violation() {
                        log::warn!("Rejected a frame that failed authentication");
                    }
                    AppEvent::Error { error }
                }
            };

            if self.events.send(event).is_err() {
                break;
            }
        }
    }
}

/// Reduce a sender-supplied name to a bare file name
fn sanitize_file_name(name: &str) -> String {
    let normalized = name.replace('\\', "/");
    Path::new(&normalized)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty() && !n.starts_with('.'))
        .unwrap_or_else(|| FALLBACK_FILE_NAME.to_string())
}

/// Write `data` into `dir` without overwriting an existing file
async fn save_file(dir: &Path, name: &str, data: &[u8]) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;

    let name = sanitize_file_name(name);
    let mut path = dir.join(&name);
    let mut attempt = 1;
    while tokio::fs::try_exists(&path).await? {
        let stem = Path::new(&name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let renamed = match Path::new(&name).extension() {
            Some(ext) => format!("{} ({}).{}", stem, attempt, ext.to_string_lossy()),
            None => format!("{} ({})", stem, attempt),
        };
        path = dir.join(renamed);
        attempt += 1;
    }

    tokio::fs::write(&path, data).await?;
    Ok(path)
}
