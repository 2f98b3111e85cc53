//! Message-bus seam
//!
//! The real transport (connection management, wire framing, reconnect) is an
//! external collaborator. This module defines the contract the handlers code
//! against: a fire-and-forget sender and an inbound message whose transport
//! buffer is returned to the pool on every exit path.

use qpdriver_common::error::{QpDriverError, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Outbound send contract
///
/// Matches the transport's fire-and-forget semantics: `true` means the
/// message was accepted for delivery, `false` that it was dropped. Retry
/// policy lives with the caller, not the transport.
pub trait BusSender: Send + Sync {
    /// Send a payload under the given message type
    fn send(&self, message_type: i32, payload: &[u8]) -> bool;
}

/// Bounded transport buffer pool
///
/// Tracks buffers handed to handlers; delivery fails once the pool is
/// exhausted, which is what an unreleased message would eventually cause on
/// the real transport.
#[derive(Debug)]
struct BufferPool {
    capacity: usize,
    outstanding: AtomicUsize,
}

impl BufferPool {
    fn try_acquire(&self) -> bool {
        let mut current = self.outstanding.load(Ordering::Acquire);
        loop {
            if current >= self.capacity {
                return false;
            }
            match self.outstanding.compare_exchange(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    fn release(&self) {
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Guard tying an inbound message to its transport buffer
///
/// The buffer is returned when the guard drops, so release happens on every
/// exit path of a handler, early returns and panics included.
#[derive(Debug)]
pub struct MessageGuard {
    pool: Arc<BufferPool>,
}

impl Drop for MessageGuard {
    fn drop(&mut self) {
        self.pool.release();
    }
}

/// A message delivered by the transport
///
/// Consumed exactly once by a handler; the handler exclusively owns the
/// underlying buffer for the duration of the call.
#[derive(Debug)]
pub struct InboundMessage {
    /// Raw wire message type
    pub message_type: i32,

    /// Subscription / policy identifier
    pub sub_id: i32,

    /// Message payload
    pub payload: Vec<u8>,

    _guard: MessageGuard,
}

impl InboundMessage {
    /// Return the transport buffer to the pool
    ///
    /// Dropping the message has the same effect; this makes early release
    /// explicit at call sites that are done with the fields.
    pub fn release(self) {}
}

/// An outbound message captured by the local bus
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    /// Wire message type
    pub message_type: i32,

    /// Serialized payload
    pub payload: Vec<u8>,
}

/// In-process message bus
///
/// Stands in for the real transport in tests and local runs: inbound
/// messages flow through a bounded channel backed by the buffer pool,
/// outbound messages are captured for inspection.
#[derive(Debug, Clone)]
pub struct LocalBus {
    inbound_tx: mpsc::Sender<InboundMessage>,
    pool: Arc<BufferPool>,
    outbound: Arc<parking_lot::Mutex<Vec<OutboundMessage>>>,
}

impl LocalBus {
    /// Create a bus with the given buffer pool size
    ///
    /// Returns the bus and the receiver the router consumes from.
    pub fn new(pool_size: usize) -> (Self, mpsc::Receiver<InboundMessage>) {
        let capacity = pool_size.max(1);
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity);

        let bus = Self {
            inbound_tx,
            pool: Arc::new(BufferPool {
                capacity,
                outstanding: AtomicUsize::new(0),
            }),
            outbound: Arc::new(parking_lot::Mutex::new(Vec::new())),
        };

        (bus, inbound_rx)
    }

    /// Deliver an inbound message to the consumer side
    pub fn deliver(&self, message_type: i32, sub_id: i32, payload: Vec<u8>) -> Result<()> {
        if !self.pool.try_acquire() {
            return Err(QpDriverError::transport("transport buffer pool exhausted"));
        }

        let message = InboundMessage {
            message_type,
            sub_id,
            payload,
            _guard: MessageGuard {
                pool: self.pool.clone(),
            },
        };

        // On failure the rejected message is dropped here and its guard
        // returns the buffer.
        self.inbound_tx
            .try_send(message)
            .map_err(|_| QpDriverError::transport("inbound channel full or closed"))
    }

    /// Number of buffers currently held by undelivered or in-flight messages
    pub fn outstanding(&self) -> usize {
        self.pool.outstanding.load(Ordering::Acquire)
    }

    /// Snapshot of the messages sent so far
    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.outbound.lock().clone()
    }

    /// Number of messages sent so far
    pub fn sent_count(&self) -> usize {
        self.outbound.lock().len()
    }
}

impl BusSender for LocalBus {
    fn send(&self, message_type: i32, payload: &[u8]) -> bool {
        self.outbound.lock().push(OutboundMessage {
            message_type,
            payload: payload.to_vec(),
        });
        true
    }
}
