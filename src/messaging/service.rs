//! Encrypted text and file exchange over an open session.

use crate::crypto::EncryptionCodec;
use crate::messaging::{Frame, MessageBody, Reassembler};
use crate::session::SessionLink;
use crate::utils::{CourierError, MessagingConfig, ProtocolError, Result, SessionError};
use bytes::Bytes;
use std::path::Path;
use tokio::sync::{mpsc, Mutex};

/// A complete message received from the peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    /// Text message
    Text(String),
    /// File transfer
    File {
        /// Base name chosen by the sender, unsanitised
        name: String,
        /// File contents
        data: Vec<u8>,
    },
}

impl From<MessageBody> for InboundMessage {
    fn from(body: MessageBody) -> Self {
        match body {
            MessageBody::Text(text) => Self::Text(text),
            MessageBody::File { name, data } => Self::File { name, data },
        }
    }
}

struct Inbound {
    frames: mpsc::UnboundedReceiver<Bytes>,
    reassembler: Reassembler,
}

/// Sends and receives messages on one session
pub struct MessageService {
    link: SessionLink,
    codec: EncryptionCodec,
    max_frame_size: usize,
    max_message_size: usize,
    inbound: Mutex<Inbound>,
}

impl MessageService {
    /// Attach to a session
    ///
    /// # Errors
    ///
    /// `SessionError::InvalidState` if the session's inbound stream already
    /// belongs to another service
    pub fn new(link: SessionLink, codec: EncryptionCodec, config: &MessagingConfig) -> Result<Self> {
        let frames = link.take_inbound().ok_or_else(|| SessionError::InvalidState {
            state: "a message service is already attached".to_string(),
        })?;

        Ok(Self {
            link,
            codec,
            max_frame_size: config.max_frame_size,
            max_message_size: config.max_message_size,
            inbound: Mutex::new(Inbound {
                frames,
                reassembler: Reassembler::new(config.max_pending_messages, config.max_message_size),
            }),
        })
    }

    /// Send a text message
    ///
    /// # Errors
    ///
    /// `SessionError::NotConnected` unless the session is open
    pub async fn send_message(&self, text: &str) -> Result<()> {
        self.send_body(&MessageBody::Text(text.to_string())).await
    }

    /// Send the file at `path` under its base name
    pub async fn send_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| CourierError::Io(format!("{} does not name a file", path.display())))?;

        // fail before reading a potentially large file
        self.link.channel()?;

        let data = tokio::fs::read(path).await?;
        log::info!("Sending file {} ({} bytes)", name, data.len());
        self.send_body(&MessageBody::File { name, data }).await
    }

    async fn send_body(&self, body: &MessageBody) -> Result<()> {
        let channel = self.link.channel()?;

        let encoded = body.encode()?;
        if encoded.len() > self.max_message_size {
            return Err(ProtocolError::MessageTooLarge {
                size: encoded.len(),
                max: self.max_message_size,
            }
            .into());
        }

        let frames = Frame::split(encoded, self.max_frame_size)?;
        log::debug!("Sending message in {} frame(s)", frames.len());

        for frame in frames {
            let token = self.codec.encrypt(&frame.encode()?)?;
            channel.send(&token).await?;
        }
        Ok(())
    }

    /// Wait for the next complete message
    ///
    /// Frames that fail to decrypt or decode come back as `Err` items and
    /// leave the session open. Returns `None` once the session has ended and
    /// every queued frame was consumed.
    pub async fn recv(&self) -> Option<Result<InboundMessage>> {
        let mut inbound = self.inbound.lock().await;
        let mut state = self.link.subscribe();

        loop {
            let frame = tokio::select! {
                biased;
                frame = inbound.frames.recv() => frame,
                _ = state.wait_for(|s| s.is_terminal()) => None,
            };

            let Some(frame) = frame else {
                inbound.reassembler.clear();
                return None;
            };

            match self.accept(&mut inbound.reassembler, &frame) {
                Ok(Some(message)) => return Some(Ok(message)),
                Ok(None) => continue,
                Err(e) => {
                    log::warn!("Dropped inbound frame ({} bytes): {}", frame.len(), e);
                    return Some(Err(e));
                }
            }
        }
    }

    fn accept(&self, reassembler: &mut Reassembler, token: &[u8]) -> Result<Option<InboundMessage>> {
        let frame = Frame::decode(&self.codec.decrypt(token)?)?;

        let body = match frame.chunk {
            Some(header) => match reassembler.push(header, frame.payload)? {
                Some(body) => body,
                None => return Ok(None),
            },
            None => {
                if frame.payload.len() > self.max_message_size {
                    return Err(ProtocolError::MessageTooLarge {
                        size: frame.payload.len(),
                        max: self.max_message_size,
                    }
                    .into());
                }
                frame.payload
            }
        };

        Ok(Some(MessageBody::decode(&body)?.into()))
    }
}
