use std::sync::Arc;
use std::time::Duration;

use tello_controller::{ControllerError, Drone, StateChanged};
use tello_emulator::{Emulator, EmulatorConfig, FlightState};
use tello_messenger::{
    BackoffPolicy, Lifecycle, RelayEvent, RelayService, SimReceiver, SimTransmitter, TransportError,
};
use tokio::sync::broadcast;
use tokio::time::timeout;

struct Session {
    emulator: Arc<Emulator>,
    drone: Drone,
}

fn session() -> Session {
    let state_link = Arc::new(SimTransmitter::new(128));
    let video_link = Arc::new(SimTransmitter::new(128));
    let config = EmulatorConfig {
        state_interval_ms: 10,
        frame_rate: 50.0,
        ..EmulatorConfig::default()
    };
    let emulator = Arc::new(
        Emulator::builder()
            .config(config)
            .state_link(state_link.clone())
            .video_link(video_link.clone())
            .build()
            .unwrap(),
    );
    let drone = Drone::builder()
        .transceiver(emulator.clone())
        .state_receiver(Arc::new(SimReceiver::new("state", state_link, BackoffPolicy::default())))
        .video_receiver(Arc::new(SimReceiver::new("video", video_link, BackoffPolicy::default())))
        .build()
        .unwrap();
    Session { emulator, drone }
}

async fn wait_for(
    rx: &mut broadcast::Receiver<StateChanged>,
    pred: impl Fn(&StateChanged) -> bool,
) -> StateChanged {
    timeout(Duration::from_secs(2), async {
        loop {
            match rx.recv().await {
                Ok(ev) if pred(&ev) => return ev,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => panic!("state feed closed: {e}"),
            }
        }
    })
    .await
    .expect("no matching state update")
}

#[tokio::test]
async fn flight_is_reflected_in_telemetry() {
    let s = session();
    let controller = s.drone.controller().clone();
    let mut states = controller.subscribe_state();

    s.emulator.power_on();
    controller.connect().await.unwrap();
    controller.calibrate_altimeter(0.0, 300.0);

    controller.take_off().await.unwrap();
    let airborne = wait_for(&mut states, |ev| ev.state.height_cm == 20).await;
    assert_eq!(airborne.position.altitude_msl_cm(), 320.0);

    controller.go_up(50).await.unwrap();
    controller.turn_counter_clockwise(90).await.unwrap();
    controller.go_forward(100).await.unwrap();
    let turned = |ev: &StateChanged| ev.state.height_cm == 70 && ev.position.heading() == 270;
    let moved = wait_for(&mut states, turned).await;
    assert_eq!(moved.position.altitude_agl_cm(), 70);
    assert!((controller.vector().x + 100.0).abs() < 1e-6);
    assert_eq!(s.emulator.state_manager().flight_state(), FlightState::InFlight);

    controller.land().await.unwrap();
    wait_for(&mut states, |ev| ev.state.height_cm == 0).await;
    assert_eq!(s.emulator.state_manager().flight_state(), FlightState::StandingBy);
}

#[tokio::test]
async fn out_of_range_move_is_rejected_without_effect() {
    let s = session();
    let controller = s.drone.controller().clone();
    s.emulator.power_on();
    controller.connect().await.unwrap();
    controller.take_off().await.unwrap();

    let err = controller.go_forward(501).await.unwrap_err();
    assert!(matches!(err, ControllerError::Rejected { .. }), "{err}");
    assert_eq!(controller.vector().y, 0.0);
    assert_eq!(s.emulator.state_manager().position().y, 0);
}

#[tokio::test]
async fn video_flows_once_streaming() {
    let s = session();
    let mut frames = s.drone.video_receiver().subscribe();
    s.emulator.power_on();
    s.drone.controller().connect().await.unwrap();
    s.drone.controller().start_video().await.unwrap();

    let ev = timeout(Duration::from_secs(2), frames.recv()).await.unwrap().unwrap();
    match ev {
        RelayEvent::Message(envelope) => assert!(!envelope.is_empty()),
        RelayEvent::Exception(e) => panic!("unexpected fault: {e}"),
    }
}

#[tokio::test]
async fn unpowered_vehicle_cannot_be_reached() {
    let s = session();
    let err = s.drone.controller().connect().await.unwrap_err();
    assert!(matches!(err, ControllerError::Transport(TransportError::Timeout)));
    assert!(!s.drone.controller().is_connected());
    assert!(!s.drone.state_receiver().is_listening());
}
