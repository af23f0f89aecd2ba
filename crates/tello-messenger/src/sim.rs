use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::debug;

use crate::receiver::{Receiver, Transport};
use crate::{lock, TransportError};

/// Listener bound to an in-memory transmitter.
pub type SimReceiver = Receiver<SimTransmitter>;

/// In-memory, bounded, lossy link used by the simulator.
///
/// When full, the oldest unit is dropped to make room, the way a datagram
/// socket buffer overflows.
#[derive(Debug)]
pub struct SimTransmitter {
    queue: Mutex<VecDeque<Result<Bytes, TransportError>>>,
    capacity: usize,
}

impl SimTransmitter {
    pub fn new(capacity: usize) -> Self {
        Self { queue: Mutex::new(VecDeque::with_capacity(capacity)), capacity: capacity.max(1) }
    }

    /// Returns false when an older unit had to be dropped.
    pub fn transmit(&self, buf: impl Into<Bytes>) -> bool {
        self.push(Ok(buf.into()))
    }

    /// Queue a failure; the receive that dequeues it returns `err`.
    pub fn inject_fault(&self, err: TransportError) -> bool {
        self.push(Err(err))
    }

    pub fn clear(&self) {
        lock(&self.queue).clear();
    }

    fn push(&self, item: Result<Bytes, TransportError>) -> bool {
        let mut q = lock(&self.queue);
        let mut kept = true;
        while q.len() >= self.capacity {
            q.pop_front();
            kept = false;
        }
        if !kept {
            debug!(capacity = self.capacity, "sim transmitter overflow, dropped oldest");
        }
        q.push_back(item);
        kept
    }
}

impl Transport for SimTransmitter {
    fn available(&self) -> usize {
        lock(&self.queue).len()
    }

    async fn receive(&self) -> Result<Bytes, TransportError> {
        let next = lock(&self.queue).pop_front();
        next.unwrap_or_else(|| Err(TransportError::Receive("nothing queued".into())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn drops_oldest_when_full() {
        let tx = SimTransmitter::new(2);
        assert!(tx.transmit("1"));
        assert!(tx.transmit("2"));
        assert!(!tx.transmit("3"));
        assert_eq!(tx.available(), 2);
        assert_eq!(tx.receive().await.unwrap(), "2");
        assert_eq!(tx.receive().await.unwrap(), "3");
        assert!(tx.receive().await.is_err());
    }
}
