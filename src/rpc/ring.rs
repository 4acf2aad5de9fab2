//! Receive ring between the UART reader and the control loop.
//!
//! A lock-free single-producer/single-consumer byte queue.  The producer
//! side (UART rx task) only enqueues; the control loop drains.  Bytes that
//! arrive while the ring is full are dropped and counted, so a stalled
//! loop can never block the reader.

use core::sync::atomic::{AtomicU32, Ordering};

use heapless::spsc::{Consumer, Producer, Queue};

/// Backing array size.  One slot is reserved by the SPSC algorithm.
pub const RX_RING_SIZE: usize = 1024;

pub struct RxRing {
    queue: Queue<u8, RX_RING_SIZE>,
    dropped: AtomicU32,
}

impl Default for RxRing {
    fn default() -> Self {
        Self::new()
    }
}

impl RxRing {
    pub const fn new() -> Self {
        Self {
            queue: Queue::new(),
            dropped: AtomicU32::new(0),
        }
    }

    /// Split into the two endpoints.  Each may move to its own context.
    pub fn split(&mut self) -> (RxProducer<'_>, RxConsumer<'_>) {
        let (producer, consumer) = self.queue.split();
        let dropped = &self.dropped;
        (
            RxProducer {
                inner: producer,
                dropped,
            },
            RxConsumer {
                inner: consumer,
                dropped,
            },
        )
    }
}

pub struct RxProducer<'a> {
    inner: Producer<'a, u8, RX_RING_SIZE>,
    dropped: &'a AtomicU32,
}

impl RxProducer<'_> {
    /// Enqueue received bytes.  Returns how many were accepted.
    pub fn push_slice(&mut self, bytes: &[u8]) -> usize {
        let mut accepted = 0;
        for &b in bytes {
            if self.inner.enqueue(b).is_ok() {
                accepted += 1;
            } else {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
        accepted
    }
}

pub struct RxConsumer<'a> {
    inner: Consumer<'a, u8, RX_RING_SIZE>,
    dropped: &'a AtomicU32,
}

impl RxConsumer<'_> {
    pub fn pop(&mut self) -> Option<u8> {
        self.inner.dequeue()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.len() == 0
    }

    /// Bytes lost to overflow since boot.
    pub fn dropped(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }
}
