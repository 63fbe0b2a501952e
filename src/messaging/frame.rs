//! Frame format carried inside each encrypted token.

use crate::crypto::TOKEN_OVERHEAD;
use crate::utils::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Bytes a frame adds on the wire on top of its payload, token included
///
/// Covers [`TOKEN_OVERHEAD`] plus the bincode encoding of a [`Frame`] with a
/// chunk header, with room to spare.
pub const FRAME_OVERHEAD: usize = 128;

const _: () = assert!(FRAME_OVERHEAD > TOKEN_OVERHEAD + 48);

/// Position of a frame within a chunked message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkHeader {
    /// Shared by every chunk of one message
    pub message_id: Uuid,
    /// Zero-based position
    pub index: u32,
    /// Number of chunks in the message
    pub total: u32,
}

/// Plaintext of one token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    /// Present when the body was split across frames
    pub chunk: Option<ChunkHeader>,
    /// Encoded [`MessageBody`], or one slice of it
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
}

impl Frame {
    /// Frame carrying a whole body
    pub fn whole(payload: Vec<u8>) -> Self {
        Self {
            chunk: None,
            payload,
        }
    }

    /// Serialize to bytes
    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(Into::into)
    }

    /// Deserialize from bytes
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(Into::into)
    }

    /// Split an encoded body into frames no larger than `max_frame_size`
    /// once sealed
    ///
    /// A body that fits goes out as a single unchunked frame.
    pub fn split(body: Vec<u8>, max_frame_size: usize) -> Result<Vec<Frame>> {
        let capacity = max_frame_size.saturating_sub(FRAME_OVERHEAD);
        if capacity == 0 {
            return Err(ProtocolError::InvalidFrame {
                reason: format!("frame size {} leaves no room for payload", max_frame_size),
            }
            .into());
        }

        if body.len() <= capacity {
            return Ok(vec![Frame::whole(body)]);
        }

        let total = u32::try_from(body.len().div_ceil(capacity)).map_err(|_| {
            ProtocolError::MessageTooLarge {
                size: body.len(),
                max: capacity.saturating_mul(u32::MAX as usize),
            }
        })?;
        let message_id = Uuid::new_v4();

        Ok(body
            .chunks(capacity)
            .zip(0..total)
            .map(|(slice, index)| Frame {
                chunk: Some(ChunkHeader {
                    message_id,
                    index,
                    total,
                }),
                payload: slice.to_vec(),
            })
            .collect())
    }
}

/// What a complete message carries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageBody {
    /// UTF-8 text
    Text(String),
    /// A file and its base name
    File {
        /// File name without directories
        name: String,
        /// File contents
        #[serde(with = "serde_bytes")]
        data: Vec<u8>,
    },
}

impl MessageBody {
    /// Serialize to bytes
    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(Into::into)
    }

    /// Deserialize from bytes
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(Into::into)
    }
}
