//! Sending Queue
//!
//! A ring of [`QUEUE_NODE_COUNT`] byte buffers of [`QUEUE_NODE_SIZE`] bytes.
//! Each node walks through:
//!
//! ```text
//! AvailableForWrite ─started─> InWriting ─finished─> ReadyToSend
//!        ^                                             │    ^
//!        │                                   attempting│    │no confirmation
//!        │                                             v    │ for 30 s
//!        └──────────confirm / expired 30 s ──────── BeingSent
//! ```
//!
//! The queue never rejects a writer: when it is full the oldest node is
//! dropped. Undelivered nodes expire [`MAX_RETRY_DURATION_MS`] after they
//! were completed. Time is a wrapping `u32` millisecond clock supplied by
//! the caller.

use core::fmt;

use crate::config::{MAX_RETRY_DURATION_MS, QUEUE_NODE_COUNT, QUEUE_NODE_SIZE};

/// State of a queue node
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum NodeState {
    /// Free, can be handed to a writer
    #[default]
    AvailableForWrite,
    /// A writer is filling it
    InWriting,
    /// Complete and waiting for the transport
    ReadyToSend,
    /// Handed to the transport, waiting for confirmation
    BeingSent,
}

#[cfg(feature = "embedded")]
impl defmt::Format for NodeState {
    fn format(&self, f: defmt::Formatter) {
        match self {
            Self::AvailableForWrite => defmt::write!(f, "AvailableForWrite"),
            Self::InWriting => defmt::write!(f, "InWriting"),
            Self::ReadyToSend => defmt::write!(f, "ReadyToSend"),
            Self::BeingSent => defmt::write!(f, "BeingSent"),
        }
    }
}

/// One fixed-size message buffer
///
/// Writes that do not fit are rejected whole, so a node never holds a
/// truncated field.
pub struct CharBufferNode {
    buffer: [u8; QUEUE_NODE_SIZE],
    len: usize,
    state: NodeState,
    completed_ms: u32,
    last_sent_ms: u32,
}

impl CharBufferNode {
    /// Empty, available node
    #[must_use]
    pub const fn new() -> Self {
        Self {
            buffer: [0; QUEUE_NODE_SIZE],
            len: 0,
            state: NodeState::AvailableForWrite,
            completed_ms: 0,
            last_sent_ms: 0,
        }
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> NodeState {
        self.state
    }

    /// Bytes written so far
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer[..self.len]
    }

    /// Number of bytes written
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether nothing was written
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Free bytes left
    #[must_use]
    pub const fn remaining(&self) -> usize {
        QUEUE_NODE_SIZE - self.len
    }

    /// Time the node was last marked ready to send
    #[must_use]
    pub const fn completed_ms(&self) -> u32 {
        self.completed_ms
    }

    /// Time the node was last handed to the transport
    #[must_use]
    pub const fn last_sent_ms(&self) -> u32 {
        self.last_sent_ms
    }

    /// Append one raw byte, `false` if full
    pub fn push_byte(&mut self, byte: u8) -> bool {
        if self.len >= QUEUE_NODE_SIZE {
            return false;
        }
        self.buffer[self.len] = byte;
        self.len += 1;
        true
    }

    /// Drop everything written after the first `len` bytes
    pub fn truncate(&mut self, len: usize) {
        if len < self.len {
            self.buffer[len..self.len].fill(0);
            self.len = len;
        }
    }

    fn reset(&mut self) {
        self.buffer[..self.len].fill(0);
        self.len = 0;
        self.state = NodeState::AvailableForWrite;
        self.completed_ms = 0;
        self.last_sent_ms = 0;
    }

    fn mark_done_writing(&mut self, now_ms: u32) {
        self.state = NodeState::ReadyToSend;
        self.completed_ms = now_ms;
    }

    fn mark_being_sent(&mut self, now_ms: u32) {
        self.state = NodeState::BeingSent;
        self.last_sent_ms = now_ms;
    }
}

impl Default for CharBufferNode {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Write for CharBufferNode {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let bytes = s.as_bytes();
        if bytes.len() > self.remaining() {
            return Err(fmt::Error);
        }
        self.buffer[self.len..self.len + bytes.len()].copy_from_slice(bytes);
        self.len += bytes.len();
        Ok(())
    }
}

impl fmt::Debug for CharBufferNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CharBufferNode")
            .field("state", &self.state)
            .field("len", &self.len)
            .field("completed_ms", &self.completed_ms)
            .field("last_sent_ms", &self.last_sent_ms)
            .finish()
    }
}

const EMPTY_NODE: CharBufferNode = CharBufferNode::new();

/// Bounded ring of message buffers with retry and expiry
///
/// `head` is the next node handed to a writer, `tail` the oldest node
/// that may still hold data.
#[derive(Debug)]
pub struct SendingQueue {
    nodes: [CharBufferNode; QUEUE_NODE_COUNT],
    head: usize,
    tail: usize,
}

impl SendingQueue {
    /// Queue with every node available
    #[must_use]
    pub const fn new() -> Self {
        Self {
            nodes: [EMPTY_NODE; QUEUE_NODE_COUNT],
            head: 0,
            tail: 0,
        }
    }

    /// Index of the next node handed to a writer
    #[must_use]
    pub const fn head(&self) -> usize {
        self.head
    }

    /// Index of the oldest node that may hold data
    #[must_use]
    pub const fn tail(&self) -> usize {
        self.tail
    }

    /// Node at `idx`
    #[must_use]
    pub fn node(&self, idx: usize) -> Option<&CharBufferNode> {
        self.nodes.get(idx)
    }

    /// Mutable node at `idx`, to write into it
    pub fn node_mut(&mut self, idx: usize) -> Option<&mut CharBufferNode> {
        self.nodes.get_mut(idx)
    }

    /// Take the node at `head` for writing
    ///
    /// A node still holding data is reset (the oldest unsent message is
    /// lost, the writer is never refused). When `head` catches up with
    /// `tail` the node at `tail` is dropped as well and `tail` advances.
    pub fn next_buffer_to_write(&mut self) -> usize {
        let idx = self.head;
        self.head = (self.head + 1) % QUEUE_NODE_COUNT;
        if self.nodes[idx].state() != NodeState::AvailableForWrite {
            pipeline_debug!("queue node {} overwritten before delivery", idx);
            self.nodes[idx].reset();
        }
        if self.head == self.tail {
            self.nodes[self.tail].reset();
            self.tail = (self.tail + 1) % QUEUE_NODE_COUNT;
        }
        idx
    }

    /// Oldest node ready to send, scanning from `tail` to `head`
    #[must_use]
    pub fn next_buffer_to_send(&self) -> Option<usize> {
        let pending = (self.head + QUEUE_NODE_COUNT - self.tail) % QUEUE_NODE_COUNT;
        (0..pending)
            .map(|k| (self.tail + k) % QUEUE_NODE_COUNT)
            .find(|&idx| self.nodes[idx].state() == NodeState::ReadyToSend)
    }

    /// Housekeeping, once per main loop pass
    ///
    /// Unconfirmed sends older than [`MAX_RETRY_DURATION_MS`] go back to
    /// `ReadyToSend` (completion time refreshed), then completed nodes
    /// older than that are dropped, then `tail` skips free nodes.
    pub fn maintain(&mut self, now_ms: u32) {
        for (idx, node) in self.nodes.iter_mut().enumerate() {
            if node.state() == NodeState::BeingSent
                && now_ms.wrapping_sub(node.last_sent_ms) > MAX_RETRY_DURATION_MS
            {
                pipeline_debug!("queue node {} unconfirmed, retrying", idx);
                node.mark_done_writing(now_ms);
            }
        }
        for (idx, node) in self.nodes.iter_mut().enumerate() {
            if node.state() >= NodeState::ReadyToSend
                && now_ms.wrapping_sub(node.completed_ms) > MAX_RETRY_DURATION_MS
            {
                pipeline_debug!("queue node {} expired", idx);
                node.reset();
            }
        }
        while self.tail != self.head && self.nodes[self.tail].state() == NodeState::AvailableForWrite {
            self.tail = (self.tail + 1) % QUEUE_NODE_COUNT;
        }
    }

    /// A writer started filling `idx`
    pub fn started_writing(&mut self, idx: usize) {
        if let Some(node) = self.checked(idx) {
            node.state = NodeState::InWriting;
        }
    }

    /// A writer is done with `idx`, it may be sent
    pub fn finished_writing(&mut self, idx: usize, now_ms: u32) {
        if let Some(node) = self.checked(idx) {
            node.mark_done_writing(now_ms);
        }
    }

    /// The transport is sending `idx`
    pub fn attempting_to_send(&mut self, idx: usize, now_ms: u32) {
        if let Some(node) = self.checked(idx) {
            node.mark_being_sent(now_ms);
        }
    }

    /// The transport confirmed delivery of `idx`
    ///
    /// Frees the node only if it is being sent, so a late or duplicate
    /// confirmation cannot drop a node that moved on. Returns whether the
    /// node was freed.
    pub fn confirm_successful_send(&mut self, idx: usize) -> bool {
        match self.checked(idx) {
            Some(node) if node.state() == NodeState::BeingSent => {
                node.reset();
                true
            }
            Some(_) => {
                pipeline_debug!("stale confirmation for queue node {}", idx);
                false
            }
            None => false,
        }
    }

    fn checked(&mut self, idx: usize) -> Option<&mut CharBufferNode> {
        let node = self.nodes.get_mut(idx);
        if node.is_none() {
            pipeline_debug!("queue node {} out of range", idx);
        }
        node
    }
}

impl Default for SendingQueue {
    fn default() -> Self {
        Self::new()
    }
}
