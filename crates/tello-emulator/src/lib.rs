pub mod doctor;
pub mod drone_state;
pub mod envelope;
pub mod state_manager;
pub mod state_server;
pub mod video;

pub use drone_state::{FlightState, Pose};
pub use envelope::ValidationError;
pub use state_manager::{EmulatorEvent, StateManager};
pub use video::{FrameSource, SyntheticSource, VideoServer};

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tello_messenger::{
    ConstructionError, RelayEvent, RelayService, SimTransmitter, Transceiver, TransportError,
};
use tello_proto::{Command, Response, TelloState};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info};

use state_server::StateServer;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmulatorConfig {
    /// Video frames per second.
    pub frame_rate: f64,
    /// Minutes of powered time from full charge to empty.
    pub battery_minutes: f64,
    /// How often the battery level is recomputed.
    pub battery_tick_ms: u64,
    /// How often the state server publishes telemetry.
    pub state_interval_ms: u64,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            frame_rate: 30.0,
            battery_minutes: 15.0,
            battery_tick_ms: 100,
            state_interval_ms: 100,
        }
    }
}

/// Why an `Emulator` could not be built.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Missing(#[from] ConstructionError),
    #[error("emulator.{field} = {value} is not usable")]
    InvalidConfig { field: &'static str, value: f64 },
}

impl EmulatorConfig {
    /// Rejects values the timers cannot represent.
    pub fn validate(&self) -> Result<(), BuildError> {
        if !self.frame_rate.is_finite() || self.frame_rate <= 0.0 {
            return Err(BuildError::InvalidConfig { field: "frame_rate", value: self.frame_rate });
        }
        let minutes = self.battery_minutes;
        if minutes <= 0.0 || Duration::try_from_secs_f64(minutes * 60.0).is_err() {
            return Err(BuildError::InvalidConfig { field: "battery_minutes", value: minutes });
        }
        Ok(())
    }

    /// Call `validate` first; out-of-range values fall back to the default life.
    pub fn battery_life(&self) -> Duration {
        Duration::try_from_secs_f64(self.battery_minutes.max(1.0 / 60.0) * 60.0)
            .unwrap_or(Duration::from_secs(15 * 60))
    }

    pub fn battery_tick(&self) -> Duration {
        Duration::from_millis(self.battery_tick_ms.max(1))
    }

    pub fn state_interval(&self) -> Duration {
        Duration::from_millis(self.state_interval_ms.max(1))
    }
}

/// A simulated vehicle: physics state machine, telemetry publisher and
/// video relay, reachable over the `Transceiver` command link.
pub struct Emulator {
    state_manager: Arc<StateManager>,
    video: Arc<VideoServer>,
    /// Power cycle the link was opened in; 0 when closed.
    link: AtomicU64,
}

#[derive(Default)]
pub struct EmulatorBuilder {
    config: EmulatorConfig,
    state_link: Option<Arc<SimTransmitter>>,
    video_link: Option<Arc<SimTransmitter>>,
    frame_source: Option<Box<dyn FrameSource>>,
}

impl EmulatorBuilder {
    pub fn config(mut self, config: EmulatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Where telemetry is published. Required.
    pub fn state_link(mut self, link: Arc<SimTransmitter>) -> Self {
        self.state_link = Some(link);
        self
    }

    /// Where video payloads are forwarded, if anywhere.
    pub fn video_link(mut self, link: Arc<SimTransmitter>) -> Self {
        self.video_link = Some(link);
        self
    }

    pub fn frame_source(mut self, source: Box<dyn FrameSource>) -> Self {
        self.frame_source = Some(source);
        self
    }

    /// Must run inside a Tokio runtime: the battery task starts here.
    pub fn build(self) -> Result<Emulator, BuildError> {
        self.config.validate()?;
        let state_link = self
            .state_link
            .ok_or(ConstructionError::missing("Emulator", "state_link"))?;
        let source = self.frame_source.unwrap_or_else(|| Box::new(SyntheticSource::default()));
        let video = Arc::new(VideoServer::new(self.config.frame_rate, source));

        let (telemetry, feed) = watch::channel(TelloState {
            ts_unix_ms: 0,
            height_cm: 0,
            barometer_cm: 0.0,
            battery_percent: 100,
            motor_time_s: 0,
            speed: envelope::DEFAULT_SPEED,
        });
        let server = Arc::new(StateServer::new(state_link, feed, self.config.state_interval()));
        let state_manager = StateManager::new(video.clone(), server, telemetry, &self.config);

        if let Some(link) = self.video_link {
            tokio::spawn(forward_video(video.subscribe(), link));
        }

        Ok(Emulator { state_manager, video, link: AtomicU64::new(0) })
    }
}

impl Emulator {
    pub fn builder() -> EmulatorBuilder {
        EmulatorBuilder::default()
    }

    pub fn state_manager(&self) -> &Arc<StateManager> {
        &self.state_manager
    }

    pub fn video(&self) -> &Arc<VideoServer> {
        &self.video
    }

    pub fn power_on(&self) {
        self.state_manager.power_on();
    }

    pub fn power_off(&self) {
        self.link.store(0, Ordering::SeqCst);
        self.state_manager.power_off();
    }

    fn dispatch(&self, command: Command) -> Response {
        let sm = &self.state_manager;
        let moved = match command {
            Command::EnterSdkMode => {
                sm.enter_sdk_mode();
                Ok(())
            }
            Command::TakeOff => {
                sm.take_off();
                Ok(())
            }
            Command::Land => {
                sm.land();
                Ok(())
            }
            Command::EmergencyStop => {
                sm.emergency_stop();
                Ok(())
            }
            Command::StartVideo => {
                sm.start_video();
                Ok(())
            }
            Command::StopVideo => {
                sm.stop_video();
                Ok(())
            }
            Command::SetSpeed(v) => sm.set_speed(v),
            Command::Forward(v) => sm.go_forward(v),
            Command::Back(v) => sm.go_back(v),
            Command::Left(v) => sm.go_left(v),
            Command::Right(v) => sm.go_right(v),
            Command::Up(v) => sm.go_up(v),
            Command::Down(v) => sm.go_down(v),
            Command::Clockwise(v) => sm.turn_clockwise(v),
            Command::CounterClockwise(v) => sm.turn_counter_clockwise(v),
            Command::Go { x, y, z, speed } => sm.go(x, y, z, speed),
            Command::GetSpeed => return Response::Value(sm.get_speed()),
            Command::GetBattery => return Response::Value(sm.get_battery()),
            Command::GetTime => return Response::Value(sm.get_time()),
        };
        match moved {
            Ok(()) => Response::Ok,
            Err(e) => Response::Error(e.to_string()),
        }
    }
}

#[async_trait]
impl Transceiver for Emulator {
    async fn connect(&self) -> Result<(), TransportError> {
        // An unpowered vehicle never answers.
        let Some(cycle) = self.state_manager.power_cycle() else {
            return Err(TransportError::Timeout);
        };
        self.link.store(cycle, Ordering::SeqCst);
        info!(cycle, "emulator: link connected");
        Ok(())
    }

    async fn disconnect(&self) {
        if self.link.swap(0, Ordering::SeqCst) != 0 {
            info!("emulator: link disconnected");
        }
    }

    async fn send(&self, command: Command) -> Result<Response, TransportError> {
        let link = self.link.load(Ordering::SeqCst);
        if link == 0 {
            return Err(TransportError::NotConnected);
        }
        match self.state_manager.power_cycle() {
            None => return Err(TransportError::Timeout),
            // Power was lost since connect, however it was lost.
            Some(cycle) if cycle != link => {
                self.link.store(0, Ordering::SeqCst);
                info!(link, cycle, "emulator: link lost to a power cycle");
                return Err(TransportError::NotConnected);
            }
            Some(_) => {}
        }
        let response = self.dispatch(command);
        debug!(%command, ?response, "emulator: command");
        Ok(response)
    }
}

async fn forward_video(
    mut frames: broadcast::Receiver<RelayEvent<tello_proto::VideoFrame>>,
    link: Arc<SimTransmitter>,
) {
    loop {
        match frames.recv().await {
            Ok(RelayEvent::Message(frame)) => {
                link.transmit(frame.payload);
            }
            Ok(RelayEvent::Exception(_)) => {}
            Err(broadcast::error::RecvError::Lagged(n)) => {
                debug!(skipped = n, "emulator: video forward lagged")
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
