//! Chunked byte FIFO.
//!
//! Chunks are kept as they arrived so that a drain step can hand the
//! consumer exactly one arrival at a time. Nothing is coalesced or split.

use std::collections::VecDeque;

#[derive(Debug, Default, Clone)]
pub struct ByteQueue {
    chunks: VecDeque<Vec<u8>>,
    len: usize,
}

impl ByteQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk. Empty chunks are dropped.
    pub fn push(&mut self, chunk: Vec<u8>) {
        if chunk.is_empty() {
            return;
        }
        self.len += chunk.len();
        self.chunks.push_back(chunk);
    }

    /// The oldest chunk, if any.
    #[must_use]
    pub fn front(&self) -> Option<&[u8]> {
        self.chunks.front().map(Vec::as_slice)
    }

    /// Remove and return the oldest chunk.
    pub fn pop_front(&mut self) -> Option<Vec<u8>> {
        let chunk = self.chunks.pop_front()?;
        self.len -= chunk.len();
        Some(chunk)
    }

    /// Total buffered bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
        self.len = 0;
    }
}
