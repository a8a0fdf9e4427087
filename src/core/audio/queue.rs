//! FIFO queue of audio chunks awaiting playback.

use std::collections::VecDeque;

use base64::prelude::*;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::AudioError;

#[derive(Debug, Default)]
struct QueueInner {
    chunks: VecDeque<Bytes>,
    dropped: u64,
}

/// Ordered chunks with a wake-up signal for the player.
///
/// With a capacity set, pushing onto a full queue drops the oldest chunk.
#[derive(Debug, Default)]
pub struct AudioChunkQueue {
    inner: Mutex<QueueInner>,
    capacity: Option<usize>,
    notify: Notify,
}

impl AudioChunkQueue {
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            capacity: capacity.filter(|c| *c > 0),
            notify: Notify::new(),
        }
    }

    pub fn unbounded() -> Self {
        Self::new(None)
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Append a chunk. Empty chunks are ignored.
    pub fn push(&self, chunk: Bytes) {
        if chunk.is_empty() {
            return;
        }
        {
            let mut inner = self.inner.lock();
            if let Some(cap) = self.capacity {
                while inner.chunks.len() >= cap {
                    inner.chunks.pop_front();
                    inner.dropped += 1;
                }
            }
            inner.chunks.push_back(chunk);
        }
        self.notify.notify_one();
    }

    /// Decode a base64 segment and append it.
    pub fn push_base64(&self, segment: &str) -> Result<(), AudioError> {
        let segment = segment.trim();
        if segment.is_empty() {
            return Ok(());
        }
        let decoded = BASE64_STANDARD
            .decode(segment)
            .map_err(|e| AudioError::Decode(e.to_string()))?;
        self.push(Bytes::from(decoded));
        Ok(())
    }

    /// Take everything queued and concatenate it in order.
    pub fn drain_concat(&self) -> Option<Bytes> {
        let chunks: Vec<Bytes> = {
            let mut inner = self.inner.lock();
            inner.chunks.drain(..).collect()
        };
        match chunks.len() {
            0 => None,
            1 => chunks.into_iter().next(),
            _ => {
                let total = chunks.iter().map(Bytes::len).sum();
                let mut buf = BytesMut::with_capacity(total);
                for chunk in &chunks {
                    buf.extend_from_slice(chunk);
                }
                Some(buf.freeze())
            }
        }
    }

    /// Discard everything queued.
    pub fn clear(&self) {
        self.inner.lock().chunks.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().chunks.is_empty()
    }

    /// Chunks discarded by the overflow policy.
    pub fn dropped_count(&self) -> u64 {
        self.inner.lock().dropped
    }

    /// Resolves once a chunk has been pushed since the last wake-up.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }
}
