//! Buffering of chunked messages.

use crate::messaging::ChunkHeader;
use crate::utils::{ProtocolError, Result};
use std::collections::{BTreeMap, HashMap, VecDeque};
use uuid::Uuid;

#[derive(Debug)]
struct Partial {
    total: u32,
    chunks: BTreeMap<u32, Vec<u8>>,
    bytes: usize,
}

/// Collects chunks per message id until every index has arrived
///
/// At most `max_pending` messages are buffered at once; when a new message
/// starts beyond that, the oldest partial is dropped. The ids of the last
/// `max_pending` completed messages are remembered so that late duplicates
/// of their chunks are dropped instead of opening a new partial.
#[derive(Debug)]
pub struct Reassembler {
    partials: HashMap<Uuid, Partial>,
    arrival: VecDeque<Uuid>,
    completed: VecDeque<Uuid>,
    max_pending: usize,
    max_message_size: usize,
}

impl Reassembler {
    /// Create an empty reassembler
    pub fn new(max_pending: usize, max_message_size: usize) -> Self {
        Self {
            partials: HashMap::new(),
            arrival: VecDeque::new(),
            completed: VecDeque::new(),
            max_pending: max_pending.max(1),
            max_message_size,
        }
    }

    /// Number of messages still incomplete
    pub fn pending(&self) -> usize {
        self.partials.len()
    }

    /// Drop every partial message
    pub fn clear(&mut self) {
        self.partials.clear();
        self.arrival.clear();
        self.completed.clear();
    }

    /// Add one chunk
    ///
    /// Returns the complete body once the last missing chunk arrives.
    /// Repeated chunks are ignored.
    ///
    /// # Errors
    ///
    /// Out-of-range indices, a zero or changed total, empty chunks of a
    /// multi-chunk message, and messages over the size limit are protocol
    /// errors; the affected partial is discarded.
    pub fn push(&mut self, header: ChunkHeader, data: Vec<u8>) -> Result<Option<Vec<u8>>> {
        let id = header.message_id;

        if self.completed.contains(&id) {
            log::debug!("Late chunk {} of completed message {} ignored", header.index, id);
            return Ok(None);
        }

        if header.total == 0 || header.index >= header.total {
            self.discard(&id);
            return Err(ProtocolError::ChunkOutOfRange {
                message_id: id.to_string(),
                index: header.index,
                total: header.total,
            }
            .into());
        }

        // Every chunk of a split message carries at least one byte.
        if header.total > 1 && data.is_empty() {
            self.discard(&id);
            return Err(ProtocolError::InvalidFrame {
                reason: format!("empty chunk {} of message {}", header.index, id),
            }
            .into());
        }
        if header.total as usize > self.max_message_size {
            self.discard(&id);
            return Err(ProtocolError::MessageTooLarge {
                size: header.total as usize,
                max: self.max_message_size,
            }
            .into());
        }

        if !self.partials.contains_key(&id) {
            self.make_room();
            self.partials.insert(
                id,
                Partial {
                    total: header.total,
                    chunks: BTreeMap::new(),
                    bytes: 0,
                },
            );
            self.arrival.push_back(id);
        }

        let Some(partial) = self.partials.get_mut(&id) else {
            return Ok(None);
        };

        if partial.total != header.total {
            let expected = partial.total;
            self.discard(&id);
            return Err(ProtocolError::ChunkTotalMismatch {
                message_id: id.to_string(),
                expected,
                actual: header.total,
            }
            .into());
        }

        if partial.chunks.contains_key(&header.index) {
            log::debug!("Duplicate chunk {} of message {} ignored", header.index, id);
            return Ok(None);
        }

        let size = partial.bytes + data.len();
        if size > self.max_message_size {
            self.discard(&id);
            return Err(ProtocolError::MessageTooLarge {
                size,
                max: self.max_message_size,
            }
            .into());
        }

        partial.bytes = size;
        partial.chunks.insert(header.index, data);

        if partial.chunks.len() as u32 == partial.total {
            let complete = self.discard(&id).map(|done| {
                let mut body = Vec::with_capacity(done.bytes);
                for chunk in done.chunks.into_values() {
                    body.extend_from_slice(&chunk);
                }
                body
            });
            self.remember_completed(id);
            return Ok(complete);
        }

        Ok(None)
    }

    fn make_room(&mut self) {
        while self.partials.len() >= self.max_pending {
            let Some(oldest) = self.arrival.pop_front() else {
                break;
            };
            if let Some(evicted) = self.partials.remove(&oldest) {
                log::warn!(
                    "Reassembly buffer full, dropping message {} ({} of {} chunks received)",
                    oldest,
                    evicted.chunks.len(),
                    evicted.total
                );
            }
        }
    }

    fn remember_completed(&mut self, id: Uuid) {
        if self.completed.len() >= self.max_pending {
            self.completed.pop_front();
        }
        self.completed.push_back(id);
    }

    fn discard(&mut self, id: &Uuid) -> Option<Partial> {
        self.arrival.retain(|queued| queued != id);
        self.partials.remove(id)
    }
}
