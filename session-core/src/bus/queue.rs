//! Outbound queue for envelopes published while disconnected

use std::collections::VecDeque;

/// FIFO of serialized envelopes awaiting a connection
#[derive(Debug, Default)]
pub struct OutboundQueue {
    frames: VecDeque<String>,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frame: String) {
        self.frames.push_back(frame);
    }

    /// Put a frame back at the head, ahead of everything queued after it.
    pub fn push_front(&mut self, frame: String) {
        self.frames.push_front(frame);
    }

    pub fn pop(&mut self) -> Option<String> {
        self.frames.pop_front()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}
