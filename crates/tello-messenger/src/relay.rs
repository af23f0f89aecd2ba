use crate::TransportError;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    Stopped,
    Listening,
}

#[derive(Debug, Clone)]
pub enum RelayEvent<M> {
    Message(M),
    /// One iteration failed; the loop keeps running.
    Exception(TransportError),
}

/// Start/stop control of a background producer. Both calls are idempotent.
pub trait Lifecycle: Send + Sync {
    fn start(&self);
    fn stop(&self);
    fn state(&self) -> ReceiverState;

    fn is_listening(&self) -> bool {
        self.state() == ReceiverState::Listening
    }
}

/// A producer that republishes received or generated units to subscribers.
///
/// Each subscriber gets its own receiver and only sees events sent after it
/// subscribed.
pub trait RelayService<M>: Lifecycle {
    fn subscribe(&self) -> broadcast::Receiver<RelayEvent<M>>;
}
