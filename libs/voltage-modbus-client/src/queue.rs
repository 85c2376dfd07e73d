//! Bounded request queue
//!
//! Producers push from any task; the single worker peeks at the front,
//! works on it, and pops it only once the request is finalized. The entry
//! list and the transaction id counter share one lock, held for the
//! mutation only.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::ModbusError;
use crate::frame::MbapHeader;
use crate::message::ModbusMessage;
use crate::target::TargetHost;

/// A queued request
#[derive(Debug)]
pub struct RequestEntry {
    /// Caller correlation token, returned unchanged with the outcome
    pub token: u32,
    pub message: ModbusMessage,
    pub target: TargetHost,
    /// MBAP header fixed when the entry was accepted
    pub header: MbapHeader,
    /// Awaiting caller of a synchronous request
    reply: Mutex<Option<oneshot::Sender<ModbusMessage>>>,
}

impl RequestEntry {
    pub fn transaction_id(&self) -> u16 {
        self.header.transaction_id
    }

    /// Take the reply channel of a synchronous request; `None` afterwards
    pub(crate) fn take_reply(&self) -> Option<oneshot::Sender<ModbusMessage>> {
        self.reply.lock().take()
    }
}

#[derive(Debug)]
struct QueueInner {
    entries: VecDeque<Arc<RequestEntry>>,
    next_transaction_id: u16,
}

/// Thread-safe FIFO of pending requests
#[derive(Debug)]
pub struct RequestQueue {
    inner: Mutex<QueueInner>,
    capacity: usize,
}

impl RequestQueue {
    pub fn new(capacity: usize) -> Self {
        Self::with_first_transaction_id(capacity, 0)
    }

    pub(crate) fn with_first_transaction_id(capacity: usize, first: u16) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                entries: VecDeque::with_capacity(capacity.min(1024)),
                next_transaction_id: first,
            }),
            capacity,
        }
    }

    /// Accept a request, returning its transaction id
    ///
    /// Fails with `RequestQueueFull` and leaves queue and counter untouched
    /// when the queue is at capacity.
    pub fn enqueue(
        &self,
        token: u32,
        message: ModbusMessage,
        target: TargetHost,
    ) -> Result<u16, ModbusError> {
        self.push(token, message, target, None)
    }

    pub(crate) fn enqueue_with_reply(
        &self,
        token: u32,
        message: ModbusMessage,
        target: TargetHost,
        reply: oneshot::Sender<ModbusMessage>,
    ) -> Result<u16, ModbusError> {
        self.push(token, message, target, Some(reply))
    }

    fn push(
        &self,
        token: u32,
        message: ModbusMessage,
        target: TargetHost,
        reply: Option<oneshot::Sender<ModbusMessage>>,
    ) -> Result<u16, ModbusError> {
        let length = u16::try_from(message.len()).map_err(|_| ModbusError::PacketLengthError)?;

        let mut inner = self.inner.lock();
        if inner.entries.len() >= self.capacity {
            debug!("Queue full: {}/{}", inner.entries.len(), self.capacity);
            return Err(ModbusError::RequestQueueFull);
        }

        let transaction_id = inner.next_transaction_id;
        inner.next_transaction_id = inner.next_transaction_id.wrapping_add(1);
        inner.entries.push_back(Arc::new(RequestEntry {
            token,
            message,
            target,
            header: MbapHeader::new(transaction_id, length),
            reply: Mutex::new(reply),
        }));
        debug!(
            "Enqueued: token={}, trans_id={:04X}, size={}",
            token,
            transaction_id,
            inner.entries.len()
        );
        Ok(transaction_id)
    }

    /// Front entry without removing it
    pub fn peek_front(&self) -> Option<Arc<RequestEntry>> {
        self.inner.lock().entries.front().cloned()
    }

    pub fn pop_front(&self) -> Option<Arc<RequestEntry>> {
        self.inner.lock().entries.pop_front()
    }

    /// Pop the front only if it is still `entry`
    ///
    /// The queue may have been cleared (and refilled) while the worker held
    /// its peeked entry.
    pub(crate) fn pop_if_front(&self, entry: &Arc<RequestEntry>) -> bool {
        let mut inner = self.inner.lock();
        match inner.entries.front() {
            Some(front) if Arc::ptr_eq(front, entry) => {
                inner.entries.pop_front();
                true
            },
            _ => false,
        }
    }

    /// Drop every queued entry, returning how many were discarded
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        let discarded = inner.entries.len();
        inner.entries.clear();
        discarded
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    fn target() -> TargetHost {
        TargetHost::new("10.0.0.5", 502, 1000, 0)
    }

    fn msg() -> ModbusMessage {
        ModbusMessage::read_registers(1, 0x03, 0, 1)
    }

    #[test]
    fn test_fifo_order() {
        let queue = RequestQueue::new(10);
        for token in 0..5 {
            queue.enqueue(token, msg(), target()).unwrap();
        }
        let tokens: Vec<u32> = std::iter::from_fn(|| queue.pop_front().map(|e| e.token)).collect();
        assert_eq!(tokens, vec![0, 1, 2, 3, 4]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_capacity_rejects_without_side_effects() {
        let queue = RequestQueue::new(2);
        assert_eq!(queue.enqueue(1, msg(), target()), Ok(0));
        assert_eq!(queue.enqueue(2, msg(), target()), Ok(1));
        assert_eq!(
            queue.enqueue(3, msg(), target()),
            Err(ModbusError::RequestQueueFull)
        );
        assert_eq!(queue.len(), 2);

        // counter did not advance on the rejected request
        queue.pop_front();
        assert_eq!(queue.enqueue(4, msg(), target()), Ok(2));
    }

    #[test]
    fn test_header_derived_at_enqueue() {
        let queue = RequestQueue::new(4);
        queue.enqueue(42, msg(), target()).unwrap();
        let entry = queue.peek_front().unwrap();
        assert_eq!(entry.header, MbapHeader::new(0, 6));
        assert_eq!(entry.token, 42);
        // peek leaves the entry in place
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_transaction_ids_wrap() {
        let queue = RequestQueue::with_first_transaction_id(8, 0xFFFE);
        let ids: Vec<u16> = (0..4)
            .map(|t| queue.enqueue(t, msg(), target()).unwrap())
            .collect();
        assert_eq!(ids, vec![0xFFFE, 0xFFFF, 0x0000, 0x0001]);
    }

    #[test]
    fn test_pop_if_front() {
        let queue = RequestQueue::new(4);
        queue.enqueue(1, msg(), target()).unwrap();
        let first = queue.peek_front().unwrap();

        queue.clear();
        queue.enqueue(2, msg(), target()).unwrap();
        assert!(!queue.pop_if_front(&first));
        assert_eq!(queue.len(), 1);

        let second = queue.peek_front().unwrap();
        assert!(queue.pop_if_front(&second));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_concurrent_producers() {
        let queue = Arc::new(RequestQueue::new(1000));
        let handles: Vec<_> = (0..4)
            .map(|p| {
                let queue = Arc::clone(&queue);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        queue.enqueue(p * 1000 + i, msg(), target()).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(queue.len(), 400);
        let mut ids: Vec<u16> =
            std::iter::from_fn(|| queue.pop_front().map(|e| e.transaction_id())).collect();
        // ids follow queue order
        assert!(ids.windows(2).all(|w| w[1] == w[0].wrapping_add(1)));
        ids.dedup();
        assert_eq!(ids.len(), 400);
    }

    #[test]
    fn test_reply_taken_once() {
        let queue = RequestQueue::new(1);
        let (tx, _rx) = oneshot::channel();
        queue.enqueue_with_reply(1, msg(), target(), tx).unwrap();
        let entry = queue.peek_front().unwrap();
        assert!(entry.take_reply().is_some());
        assert!(entry.take_reply().is_none());
    }
}
