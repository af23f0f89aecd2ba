use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tello_messenger::{lock, Transceiver, TransportError};
use tello_proto::{Command, Envelope, Response, TelloState};
use tello_state::{AltimeterCalibration, Position, Vector};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::ControllerError;

const EVENT_CAPACITY: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStateChanged {
    pub connected: bool,
}

/// Published for every telemetry update.
#[derive(Debug, Clone, PartialEq)]
pub struct StateChanged {
    pub state: TelloState,
    pub position: Position,
}

/// Turns a raw state-link payload into telemetry.
pub trait StateDecoder: Send + Sync {
    fn decode(&self, payload: &[u8]) -> Result<TelloState, ControllerError>;
}

/// Decoder for the simulator's JSON state payload.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonStateDecoder;

impl StateDecoder for JsonStateDecoder {
    fn decode(&self, payload: &[u8]) -> Result<TelloState, ControllerError> {
        serde_json::from_slice(payload).map_err(|e| ControllerError::Telemetry(e.to_string()))
    }
}

/// Issues commands over a `Transceiver`, tracks connection state and
/// republishes decoded telemetry as `StateChanged`.
///
/// Keeps a dead-reckoning `Vector` advanced by every accepted movement.
pub struct FlightController {
    transceiver: Arc<dyn Transceiver>,
    decoder: Box<dyn StateDecoder>,
    connected: AtomicBool,
    connection_events: broadcast::Sender<ConnectionStateChanged>,
    state_events: broadcast::Sender<StateChanged>,
    calibration: Mutex<AltimeterCalibration>,
    vector: Mutex<Vector>,
    last_state: Mutex<Option<StateChanged>>,
}

impl FlightController {
    pub fn new(transceiver: Arc<dyn Transceiver>) -> Self {
        Self::with_decoder(transceiver, Box::new(JsonStateDecoder))
    }

    pub fn with_decoder(transceiver: Arc<dyn Transceiver>, decoder: Box<dyn StateDecoder>) -> Self {
        let (connection_events, _) = broadcast::channel(EVENT_CAPACITY);
        let (state_events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            transceiver,
            decoder,
            connected: AtomicBool::new(false),
            connection_events,
            state_events,
            calibration: Mutex::new(AltimeterCalibration::default()),
            vector: Mutex::new(Vector::default()),
            last_state: Mutex::new(None),
        }
    }

    pub fn subscribe_connection(&self) -> broadcast::Receiver<ConnectionStateChanged> {
        self.connection_events.subscribe()
    }

    pub fn subscribe_state(&self) -> broadcast::Receiver<StateChanged> {
        self.state_events.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Opens the link and puts the vehicle into SDK mode.
    pub async fn connect(&self) -> Result<(), ControllerError> {
        if self.is_connected() {
            return Ok(());
        }
        self.transceiver.connect().await?;
        match self.transceiver.send(Command::EnterSdkMode).await? {
            Response::Ok => {}
            Response::Error(reason) => {
                self.transceiver.disconnect().await;
                return Err(ControllerError::Rejected { command: Command::EnterSdkMode, reason });
            }
            Response::Value(_) => {
                return Err(ControllerError::UnexpectedReply(Command::EnterSdkMode));
            }
        }
        *lock(&self.vector) = Vector::default();
        self.set_connected(true);
        Ok(())
    }

    pub async fn disconnect(&self) {
        self.transceiver.disconnect().await;
        self.set_connected(false);
    }

    fn set_connected(&self, connected: bool) {
        if self.connected.swap(connected, Ordering::SeqCst) != connected {
            info!(connected, "controller: connection state changed");
            let _ = self.connection_events.send(ConnectionStateChanged { connected });
        }
    }

    /// Send one command. A rejected command is an error and does not move the
    /// dead-reckoning pose; a timeout drops the connection.
    pub async fn execute(&self, command: Command) -> Result<Response, ControllerError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected.into());
        }
        let response = match self.transceiver.send(command).await {
            Ok(r) => r,
            Err(TransportError::Timeout) => {
                warn!(%command, "controller: vehicle stopped answering");
                self.set_connected(false);
                return Err(TransportError::Timeout.into());
            }
            Err(e) => return Err(e.into()),
        };
        if let Response::Error(reason) = response {
            debug!(%command, %reason, "controller: rejected");
            return Err(ControllerError::Rejected { command, reason });
        }
        self.dead_reckon(command);
        Ok(response)
    }

    fn dead_reckon(&self, command: Command) {
        let mut v = lock(&self.vector);
        *v = match command {
            Command::Forward(cm) => v.translate(0.0, cm as f64),
            Command::Back(cm) => v.translate(0.0, -cm as f64),
            Command::Right(cm) => v.translate(cm as f64, 0.0),
            Command::Left(cm) => v.translate(-cm as f64, 0.0),
            Command::Clockwise(deg) => v.turn(deg),
            Command::CounterClockwise(deg) => v.turn(-deg),
            Command::Go { x, y, .. } => v.translate(x as f64, y as f64),
            _ => return,
        };
    }

    async fn query(&self, command: Command) -> Result<i32, ControllerError> {
        match self.execute(command).await? {
            Response::Value(v) => Ok(v),
            _ => Err(ControllerError::UnexpectedReply(command)),
        }
    }

    async fn act(&self, command: Command) -> Result<(), ControllerError> {
        self.execute(command).await.map(|_| ())
    }

    pub async fn take_off(&self) -> Result<(), ControllerError> {
        self.act(Command::TakeOff).await
    }

    pub async fn land(&self) -> Result<(), ControllerError> {
        self.act(Command::Land).await
    }

    pub async fn emergency_stop(&self) -> Result<(), ControllerError> {
        self.act(Command::EmergencyStop).await
    }

    pub async fn set_speed(&self, speed: i32) -> Result<(), ControllerError> {
        self.act(Command::SetSpeed(speed)).await
    }

    pub async fn go_forward(&self, cm: i32) -> Result<(), ControllerError> {
        self.act(Command::Forward(cm)).await
    }

    pub async fn go_back(&self, cm: i32) -> Result<(), ControllerError> {
        self.act(Command::Back(cm)).await
    }

    pub async fn go_left(&self, cm: i32) -> Result<(), ControllerError> {
        self.act(Command::Left(cm)).await
    }

    pub async fn go_right(&self, cm: i32) -> Result<(), ControllerError> {
        self.act(Command::Right(cm)).await
    }

    pub async fn go_up(&self, cm: i32) -> Result<(), ControllerError> {
        self.act(Command::Up(cm)).await
    }

    pub async fn go_down(&self, cm: i32) -> Result<(), ControllerError> {
        self.act(Command::Down(cm)).await
    }

    pub async fn turn_clockwise(&self, degrees: i32) -> Result<(), ControllerError> {
        self.act(Command::Clockwise(degrees)).await
    }

    pub async fn turn_counter_clockwise(&self, degrees: i32) -> Result<(), ControllerError> {
        self.act(Command::CounterClockwise(degrees)).await
    }

    pub async fn go(&self, x: i32, y: i32, z: i32, speed: i32) -> Result<(), ControllerError> {
        self.act(Command::Go { x, y, z, speed }).await
    }

    pub async fn start_video(&self) -> Result<(), ControllerError> {
        self.act(Command::StartVideo).await
    }

    pub async fn stop_video(&self) -> Result<(), ControllerError> {
        self.act(Command::StopVideo).await
    }

    pub async fn get_speed(&self) -> Result<i32, ControllerError> {
        self.query(Command::GetSpeed).await
    }

    pub async fn get_battery(&self) -> Result<i32, ControllerError> {
        self.query(Command::GetBattery).await
    }

    pub async fn get_time(&self) -> Result<i32, ControllerError> {
        self.query(Command::GetTime).await
    }

    pub fn calibrate_altimeter(&self, barometric_altitude_cm: f64, actual_altitude_cm: f64) {
        let cal = AltimeterCalibration::new(barometric_altitude_cm, actual_altitude_cm);
        info!(delta_cm = cal.delta_cm(), "controller: altimeter calibrated");
        *lock(&self.calibration) = cal;
    }

    pub fn calibration(&self) -> AltimeterCalibration {
        *lock(&self.calibration)
    }

    pub fn vector(&self) -> Vector {
        *lock(&self.vector)
    }

    pub fn last_state(&self) -> Option<StateChanged> {
        lock(&self.last_state).clone()
    }

    /// Decode one state-link unit and publish it.
    pub fn update_state(&self, envelope: &Envelope) -> Result<(), ControllerError> {
        let state = self.decoder.decode(&envelope.payload)?;
        let position = Position::with_vector(&state, &self.vector(), &self.calibration());
        let changed = StateChanged { state, position };
        *lock(&self.last_state) = Some(changed.clone());
        let _ = self.state_events.send(changed);
        Ok(())
    }
}
