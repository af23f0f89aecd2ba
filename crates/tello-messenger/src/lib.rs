pub mod backoff;
pub mod doctor;
pub mod error;
pub mod receiver;
pub mod relay;
pub mod sim;
pub mod transceiver;

pub use backoff::BackoffPolicy;
pub use error::{ConstructionError, TransportError};
pub use receiver::{Receiver, Transport};
pub use relay::{Lifecycle, ReceiverState, RelayEvent, RelayService};
pub use sim::{SimReceiver, SimTransmitter};
pub use transceiver::Transceiver;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock ignoring poison: every guarded value here stays valid across a panic.
pub fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
