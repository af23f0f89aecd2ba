use bytes::Bytes;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tello_proto::Envelope;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::backoff::{Backoff, BackoffPolicy};
use crate::relay::{Lifecycle, ReceiverState, RelayEvent, RelayService};
use crate::{lock, TransportError};

const EVENT_CAPACITY: usize = 256;

/// The two capabilities a polled, possibly lossy link has to offer.
pub trait Transport: Send + Sync + 'static {
    /// Units that can be received right now.
    fn available(&self) -> usize;

    /// Receive one unit. May suspend.
    fn receive(&self) -> impl Future<Output = Result<Bytes, TransportError>> + Send;
}

/// Cancellable polling loop that turns transport availability into
/// `RelayEvent::Message` events.
///
/// A failed iteration is published as `RelayEvent::Exception` and the loop
/// carries on. `start` spawns onto the current Tokio runtime.
pub struct Receiver<T: Transport> {
    name: String,
    transport: Arc<T>,
    policy: BackoffPolicy,
    events: broadcast::Sender<RelayEvent<Envelope>>,
    running: Mutex<Option<CancellationToken>>,
    discarded: Arc<AtomicU64>,
}

impl<T: Transport> Receiver<T> {
    pub fn new(name: impl Into<String>, transport: Arc<T>, policy: BackoffPolicy) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            name: name.into(),
            transport,
            policy,
            events,
            running: Mutex::new(None),
            discarded: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Units already dequeued when a stop arrived, and therefore never delivered.
    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }
}

impl<T: Transport> Lifecycle for Receiver<T> {
    fn start(&self) {
        let mut running = lock(&self.running);
        if running.is_some() {
            return;
        }
        let token = CancellationToken::new();
        *running = Some(token.clone());

        info!(receiver = %self.name, "receiver listening");
        tokio::spawn(listen(
            self.name.clone(),
            self.transport.clone(),
            self.policy,
            self.events.clone(),
            self.discarded.clone(),
            token,
        ));
    }

    fn stop(&self) {
        if let Some(token) = lock(&self.running).take() {
            token.cancel();
            info!(receiver = %self.name, "receiver stopping");
        }
    }

    fn state(&self) -> ReceiverState {
        if lock(&self.running).is_some() {
            ReceiverState::Listening
        } else {
            ReceiverState::Stopped
        }
    }
}

impl<T: Transport> RelayService<Envelope> for Receiver<T> {
    fn subscribe(&self) -> broadcast::Receiver<RelayEvent<Envelope>> {
        self.events.subscribe()
    }
}

impl<T: Transport> Drop for Receiver<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn listen<T: Transport>(
    name: String,
    transport: Arc<T>,
    policy: BackoffPolicy,
    events: broadcast::Sender<RelayEvent<Envelope>>,
    discarded: Arc<AtomicU64>,
    token: CancellationToken,
) {
    let mut backoff = Backoff::new(policy);
    let mut received: u64 = 0;
    let mut failures: u64 = 0;

    while !token.is_cancelled() {
        if transport.available() == 0 {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = backoff.snooze() => {}
            }
            continue;
        }
        backoff.reset();

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            r = transport.receive() => r,
        };
        // Stop wins over a unit that arrived in the same iteration.
        if token.is_cancelled() {
            if let Ok(buf) = &result {
                discarded.fetch_add(1, Ordering::Relaxed);
                debug!(receiver = %name, len = buf.len(), "unit dropped by stop");
            }
            break;
        }

        match result {
            Ok(buf) => {
                received += 1;
                trace!(receiver = %name, len = buf.len(), "unit received");
                if events.send(RelayEvent::Message(Envelope::new(buf))).is_err() {
                    debug!(receiver = %name, "no subscribers");
                }
            }
            Err(e) => {
                failures += 1;
                warn!(receiver = %name, error = %e, "receive failed");
                let _ = events.send(RelayEvent::Exception(e));
            }
        }
    }

    info!(receiver = %name, received, failures, "receiver stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimTransmitter;
    use std::sync::{OnceLock, Weak};
    use std::time::Duration;
    use tokio::sync::broadcast::error::TryRecvError;
    use tokio::time::timeout;

    fn receiver(tx: &Arc<SimTransmitter>) -> Receiver<SimTransmitter> {
        Receiver::new("test", tx.clone(), BackoffPolicy::default())
    }

    async fn next(rx: &mut broadcast::Receiver<RelayEvent<Envelope>>) -> RelayEvent<Envelope> {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("event within deadline")
            .expect("channel open")
    }

    fn payload(ev: RelayEvent<Envelope>) -> Bytes {
        match ev {
            RelayEvent::Message(env) => env.payload,
            RelayEvent::Exception(e) => panic!("unexpected exception: {e}"),
        }
    }

    #[tokio::test]
    async fn delivers_units_in_order() {
        let tx = Arc::new(SimTransmitter::new(16));
        let r = receiver(&tx);
        let mut rx = r.subscribe();

        assert_eq!(r.state(), ReceiverState::Stopped);
        r.start();
        assert_eq!(r.state(), ReceiverState::Listening);

        for p in ["a", "b", "c"] {
            tx.transmit(p);
        }
        assert_eq!(payload(next(&mut rx).await), "a");
        assert_eq!(payload(next(&mut rx).await), "b");
        assert_eq!(payload(next(&mut rx).await), "c");
        r.stop();
    }

    #[tokio::test]
    async fn start_twice_runs_one_loop() {
        let tx = Arc::new(SimTransmitter::new(16));
        let r = receiver(&tx);
        let mut rx = r.subscribe();
        r.start();
        r.start();

        tx.transmit("only");
        assert_eq!(payload(next(&mut rx).await), "only");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
        r.stop();
    }

    #[tokio::test]
    async fn nothing_delivered_after_stop() {
        let tx = Arc::new(SimTransmitter::new(16));
        let r = receiver(&tx);
        let mut rx = r.subscribe();
        r.start();
        tx.transmit("before");
        assert_eq!(payload(next(&mut rx).await), "before");

        r.stop();
        r.stop();
        assert_eq!(r.state(), ReceiverState::Stopped);

        tx.transmit("after");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
        assert_eq!(tx.available(), 1);
    }

    #[tokio::test]
    async fn restart_resumes_delivery() {
        let tx = Arc::new(SimTransmitter::new(16));
        let r = receiver(&tx);
        let mut rx = r.subscribe();
        r.start();
        r.stop();
        tx.transmit("queued");
        r.start();
        assert_eq!(payload(next(&mut rx).await), "queued");
        r.stop();
    }

    #[tokio::test]
    async fn failed_iteration_does_not_end_loop() {
        let tx = Arc::new(SimTransmitter::new(16));
        let r = receiver(&tx);
        let mut rx = r.subscribe();
        r.start();

        tx.inject_fault(TransportError::Receive("checksum".into()));
        tx.transmit("next");

        match next(&mut rx).await {
            RelayEvent::Exception(e) => assert_eq!(e, TransportError::Receive("checksum".into())),
            other => panic!("expected exception, got {other:?}"),
        }
        assert_eq!(payload(next(&mut rx).await), "next");
        assert!(r.is_listening());
        r.stop();
    }

    #[tokio::test]
    async fn late_subscriber_misses_earlier_events() {
        let tx = Arc::new(SimTransmitter::new(16));
        let r = receiver(&tx);
        let mut early = r.subscribe();
        r.start();

        tx.transmit("first");
        assert_eq!(payload(next(&mut early).await), "first");

        let mut late = r.subscribe();
        tx.transmit("second");
        assert_eq!(payload(next(&mut late).await), "second");
        assert_eq!(payload(next(&mut early).await), "second");
        r.stop();
    }

    /// Stops its own receiver from inside `receive`, so the unit is in hand when stop lands.
    struct StopsOnReceive {
        receiver: OnceLock<Weak<Receiver<StopsOnReceive>>>,
    }

    impl Transport for StopsOnReceive {
        fn available(&self) -> usize {
            1
        }

        async fn receive(&self) -> Result<Bytes, TransportError> {
            if let Some(r) = self.receiver.get().and_then(Weak::upgrade) {
                r.stop();
            }
            Ok(Bytes::from_static(b"in hand"))
        }
    }

    #[tokio::test]
    async fn unit_in_hand_at_stop_is_counted_not_delivered() {
        let transport = Arc::new(StopsOnReceive { receiver: OnceLock::new() });
        let r = Arc::new(Receiver::new("stopper", transport.clone(), BackoffPolicy::default()));
        assert!(transport.receiver.set(Arc::downgrade(&r)).is_ok());
        let mut rx = r.subscribe();

        r.start();
        timeout(Duration::from_secs(2), async {
            while r.discarded() == 0 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("stop observed with a unit in hand");

        assert_eq!(r.discarded(), 1);
        assert_eq!(r.state(), ReceiverState::Stopped);
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }
}
