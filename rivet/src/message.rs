use std::any::Any;
use std::collections::VecDeque;
use std::fmt;

use crate::buffer::{self, ByteOrder, ChannelBuffer};

/// An arbitrary message travelling through a pipeline.
pub type Message = Box<dyn Any + Send>;

const INITIAL_CAPACITY: usize = 256;

/// Per-context container of pending data.
///
/// Raw bytes accumulate in a cumulative [`ChannelBuffer`]; decoded or
/// application-level messages queue up in FIFO order. A `message_updated`
/// event tells a handler its inbound container changed, a `flush` that its
/// outbound container has something to move along.
pub struct MessageBuf {
    bytes: ChannelBuffer,
    messages: VecDeque<Message>,
}

impl MessageBuf {
    pub fn new() -> Self {
        Self::with_order(ByteOrder::BigEndian)
    }

    pub fn with_order(order: ByteOrder) -> Self {
        Self {
            bytes: buffer::buffer(order, INITIAL_CAPACITY),
            messages: VecDeque::new(),
        }
    }

    pub fn bytes(&self) -> &ChannelBuffer {
        &self.bytes
    }

    pub fn bytes_mut(&mut self) -> &mut ChannelBuffer {
        &mut self.bytes
    }

    /// Adds a message. `ChannelBuffer` messages are appended to the byte buffer.
    pub fn add(&mut self, msg: Message) {
        match msg.downcast::<ChannelBuffer>() {
            Ok(mut bytes) => {
                self.bytes.write_buffer(&mut bytes);
            }
            Err(msg) => self.messages.push_back(msg),
        }
    }

    /// Queues a message object as-is, even if it is a `ChannelBuffer`.
    pub fn push<M: Any + Send>(&mut self, msg: M) {
        self.messages.push_back(Box::new(msg));
    }

    pub fn push_boxed(&mut self, msg: Message) {
        self.messages.push_back(msg);
    }

    pub fn pop(&mut self) -> Option<Message> {
        self.messages.pop_front()
    }

    /// Pops the front message if it is a `M`.
    pub fn pop_as<M: Any>(&mut self) -> Option<M> {
        if !self.messages.front()?.is::<M>() {
            return None;
        }
        self.messages
            .pop_front()
            .and_then(|msg| msg.downcast::<M>().ok())
            .map(|msg| *msg)
    }

    pub fn drain(&mut self) -> std::collections::vec_deque::Drain<'_, Message> {
        self.messages.drain(..)
    }

    /// Number of queued message objects.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// True if there are neither readable bytes nor queued messages.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && !self.bytes.is_readable()
    }

    /// Moves everything into `other`, bytes first.
    pub fn transfer_to(&mut self, other: &mut MessageBuf) {
        other.bytes.write_buffer(&mut self.bytes);
        other.messages.extend(self.messages.drain(..));
        self.bytes.discard_read_bytes();
    }

    pub fn discard_read_bytes(&mut self) {
        self.bytes.discard_read_bytes();
    }

    /// Drops all pending bytes and messages.
    pub fn clear(&mut self) {
        self.bytes.clear();
        self.messages.clear();
    }
}

impl Default for MessageBuf {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MessageBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageBuf")
            .field("readable_bytes", &self.bytes.readable_bytes())
            .field("messages", &self.messages.len())
            .finish()
    }
}
