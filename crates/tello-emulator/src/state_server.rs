use std::sync::{Arc, Mutex};
use std::time::Duration;
use tello_messenger::{lock, Lifecycle, ReceiverState, SimTransmitter};
use tello_proto::telemetry::{now_unix_ms, TelloState};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Publishes the latest vehicle state onto the state link at a fixed interval
/// while the vehicle is powered.
pub struct StateServer {
    link: Arc<SimTransmitter>,
    feed: watch::Receiver<TelloState>,
    interval: Duration,
    running: Mutex<Option<CancellationToken>>,
}

impl StateServer {
    pub fn new(
        link: Arc<SimTransmitter>,
        feed: watch::Receiver<TelloState>,
        interval: Duration,
    ) -> Self {
        Self { link, feed, interval, running: Mutex::new(None) }
    }
}

impl Lifecycle for StateServer {
    fn start(&self) {
        let mut running = lock(&self.running);
        if running.is_some() {
            return;
        }
        let token = CancellationToken::new();
        *running = Some(token.clone());
        info!(interval_ms = self.interval.as_millis() as u64, "state server: started");
        tokio::spawn(publish_state(self.link.clone(), self.feed.clone(), self.interval, token));
    }

    fn stop(&self) {
        if let Some(token) = lock(&self.running).take() {
            token.cancel();
            info!("state server: stopped");
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

impl Drop for StateServer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn publish_state(
    link: Arc<SimTransmitter>,
    feed: watch::Receiver<TelloState>,
    period: Duration,
    token: CancellationToken,
) {
    let mut ticks = tokio::time::interval(period);
    ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut sent: u64 = 0;

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticks.tick() => {}
        }
        let mut state = feed.borrow().clone();
        state.ts_unix_ms = now_unix_ms();
        match serde_json::to_vec(&state) {
            Ok(buf) => {
                link.transmit(buf);
                sent += 1;
            }
            Err(e) => warn!(error = %e, "state server: encode failed"),
        }
    }
    debug!(sent, "state server: loop ended");
}
