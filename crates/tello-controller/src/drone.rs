use std::sync::Arc;
use tello_messenger::{ConstructionError, Lifecycle, RelayEvent, RelayService, Transceiver};
use tello_proto::Envelope;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::{ConnectionStateChanged, FlightController};

type Listener = Arc<dyn RelayService<Envelope>>;

/// Composition root: a flight controller plus the state and video
/// listeners, kept running exactly while the controller is connected.
pub struct Drone {
    controller: Arc<FlightController>,
    state_receiver: Listener,
    video_receiver: Listener,
    tasks: Vec<JoinHandle<()>>,
}

#[derive(Default)]
pub struct DroneBuilder {
    transceiver: Option<Arc<dyn Transceiver>>,
    state_receiver: Option<Listener>,
    video_receiver: Option<Listener>,
}

impl DroneBuilder {
    pub fn transceiver(mut self, transceiver: Arc<dyn Transceiver>) -> Self {
        self.transceiver = Some(transceiver);
        self
    }

    pub fn state_receiver(mut self, receiver: Listener) -> Self {
        self.state_receiver = Some(receiver);
        self
    }

    pub fn video_receiver(mut self, receiver: Listener) -> Self {
        self.video_receiver = Some(receiver);
        self
    }

    /// Must run inside a Tokio runtime.
    pub fn build(self) -> Result<Drone, ConstructionError> {
        let transceiver = self
            .transceiver
            .ok_or(ConstructionError::missing("Drone", "transceiver"))?;
        let state_receiver = self
            .state_receiver
            .ok_or(ConstructionError::missing("Drone", "state_receiver"))?;
        let video_receiver = self
            .video_receiver
            .ok_or(ConstructionError::missing("Drone", "video_receiver"))?;
        let controller = Arc::new(FlightController::new(transceiver));

        // Subscribe before spawning so a connect issued right after build is seen.
        let connection = controller.subscribe_connection();
        let telemetry = state_receiver.subscribe();
        let tasks = vec![
            tokio::spawn(follow_connection(
                controller.clone(),
                connection,
                state_receiver.clone(),
                video_receiver.clone(),
            )),
            tokio::spawn(forward_state(controller.clone(), telemetry)),
        ];
        Ok(Drone { controller, state_receiver, video_receiver, tasks })
    }
}

impl Drone {
    pub fn builder() -> DroneBuilder {
        DroneBuilder::default()
    }

    pub fn controller(&self) -> &Arc<FlightController> {
        &self.controller
    }

    pub fn state_receiver(&self) -> &Listener {
        &self.state_receiver
    }

    /// Subscribe here for raw video payloads.
    pub fn video_receiver(&self) -> &Listener {
        &self.video_receiver
    }
}

impl Drop for Drone {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
        self.state_receiver.stop();
        self.video_receiver.stop();
    }
}

async fn follow_connection(
    controller: Arc<FlightController>,
    mut events: broadcast::Receiver<ConnectionStateChanged>,
    state: Listener,
    video: Listener,
) {
    loop {
        let connected = match events.recv().await {
            Ok(ev) => ev.connected,
            // Only the latest state matters.
            Err(RecvError::Lagged(_)) => controller.is_connected(),
            Err(RecvError::Closed) => break,
        };
        apply(connected, &state, &video);
    }
}

fn apply(connected: bool, state: &Listener, video: &Listener) {
    debug!(connected, "drone: switching listeners");
    if connected {
        state.start();
        video.start();
    } else {
        state.stop();
        video.stop();
    }
}

async fn forward_state(
    controller: Arc<FlightController>,
    mut events: broadcast::Receiver<RelayEvent<Envelope>>,
) {
    loop {
        match events.recv().await {
            Ok(RelayEvent::Message(envelope)) => {
                if let Err(e) = controller.update_state(&envelope) {
                    warn!(error = %e, "drone: dropped state update");
                }
            }
            Ok(RelayEvent::Exception(e)) => warn!(error = %e, "drone: state listener fault"),
            Err(RecvError::Lagged(n)) => warn!(skipped = n, "drone: state updates lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tello_emulator::{Emulator, EmulatorConfig};
    use tello_messenger::{BackoffPolicy, SimReceiver, SimTransmitter, Transport};

    struct Rig {
        emulator: Arc<Emulator>,
        state_link: Arc<SimTransmitter>,
        drone: Drone,
    }

    fn rig() -> Rig {
        let state_link = Arc::new(SimTransmitter::new(64));
        let video_link = Arc::new(SimTransmitter::new(64));
        let config = EmulatorConfig { state_interval_ms: 10, ..EmulatorConfig::default() };
        let emulator = Arc::new(
            Emulator::builder()
                .config(config)
                .state_link(state_link.clone())
                .video_link(video_link.clone())
                .build()
                .unwrap(),
        );
        let policy = BackoffPolicy::default();
        let drone = Drone::builder()
            .transceiver(emulator.clone())
            .state_receiver(Arc::new(SimReceiver::new("state", state_link.clone(), policy)))
            .video_receiver(Arc::new(SimReceiver::new("video", video_link, policy)))
            .build()
            .unwrap();
        Rig { emulator, state_link, drone }
    }

    async fn eventually(mut check: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }

    #[tokio::test]
    async fn build_reports_missing_collaborator() {
        let link = Arc::new(SimTransmitter::new(4));
        let err = Drone::builder()
            .state_receiver(Arc::new(SimReceiver::new("state", link, BackoffPolicy::default())))
            .build()
            .err()
            .unwrap();
        assert_eq!(err, ConstructionError::missing("Drone", "transceiver"));
    }

    #[tokio::test]
    async fn listeners_follow_connection_state() {
        let r = rig();
        assert!(!r.drone.state_receiver().is_listening());

        r.emulator.power_on();
        r.drone.controller().connect().await.unwrap();
        let listening =
            || r.drone.state_receiver().is_listening() && r.drone.video_receiver().is_listening();
        assert!(eventually(listening).await);

        r.drone.controller().disconnect().await;
        let stopped =
            || !r.drone.state_receiver().is_listening() && !r.drone.video_receiver().is_listening();
        assert!(eventually(stopped).await);
    }

    #[tokio::test]
    async fn telemetry_reaches_controller() {
        let r = rig();
        r.emulator.power_on();
        r.drone.controller().connect().await.unwrap();
        r.drone.controller().take_off().await.unwrap();

        let controller = r.drone.controller().clone();
        assert!(
            eventually(|| controller.last_state().is_some_and(|s| s.state.height_cm == 20)).await,
            "state link backlog: {}",
            r.state_link.available()
        );
    }
}
