use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tello_messenger::{lock, Lifecycle};
use tello_proto::telemetry::{now_unix_ms, TelloState};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::drone_state::{DroneState, FlightState, Pose};
use crate::envelope::{ValidationError, DEFAULT_SPEED, DISTANCE_CM, OFFSET_CM, ROTATION_DEG, SPEED};
use crate::EmulatorConfig;

const TAKEOFF_HEIGHT_CM: i32 = 20;
const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub enum EmulatorEvent {
    PowerChanged { powered_up: bool },
    FlightStateChanged(FlightState),
    BatteryDied,
}

/// The simulated vehicle's flight/physics state machine.
///
/// Every command is a silent no-op while the vehicle is unpowered, but
/// argument ranges are checked first and fail regardless of power.
/// One mutex serializes commands and the battery task, so every published
/// `TelloState` is a consistent snapshot.
pub struct StateManager {
    state: Mutex<DroneState>,
    video: Arc<dyn Lifecycle>,
    state_server: Arc<dyn Lifecycle>,
    telemetry: watch::Sender<TelloState>,
    events: broadcast::Sender<EmulatorEvent>,
    battery_life: Duration,
}

impl StateManager {
    /// Starts the battery task on the current Tokio runtime; it ends when
    /// the returned manager is dropped.
    pub fn new(
        video: Arc<dyn Lifecycle>,
        state_server: Arc<dyn Lifecycle>,
        telemetry: watch::Sender<TelloState>,
        config: &EmulatorConfig,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let manager = Arc::new(Self {
            state: Mutex::new(DroneState::default()),
            video,
            state_server,
            telemetry,
            events,
            battery_life: config.battery_life(),
        });
        manager.publish(&manager.lock());
        tokio::spawn(discharge_battery(Arc::downgrade(&manager), config.battery_tick()));
        manager
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EmulatorEvent> {
        self.events.subscribe()
    }

    // ----- power -----

    pub fn power_on(&self) {
        {
            let mut s = self.lock();
            if s.powered_up {
                return;
            }
            s.powered_up = true;
            s.power_cycle += 1;
            s.battery_clock.start();
            s.flight_state = FlightState::StandingBy;
            s.sdk_mode_active = false;
            s.speed = DEFAULT_SPEED;
            self.publish(&s);
        }
        self.state_server.start();
        info!("emulator: powered on");
        let _ = self.events.send(EmulatorEvent::PowerChanged { powered_up: true });
    }

    pub fn power_off(&self) {
        let video_was_on = {
            let mut s = self.lock();
            if !s.powered_up {
                return;
            }
            s.powered_up = false;
            s.battery_clock.stop();
            s.motor_clock.stop();
            s.flight_state = FlightState::StandingBy;
            s.sdk_mode_active = false;
            s.speed = DEFAULT_SPEED;
            let was_on = std::mem::replace(&mut s.video_on, false);
            self.publish(&s);
            was_on
        };
        self.state_server.stop();
        if video_was_on {
            self.video.stop();
        }
        info!("emulator: powered off");
        let _ = self.events.send(EmulatorEvent::PowerChanged { powered_up: false });
    }

    /// Restores a full charge, including the discharge clock.
    pub fn recharge_battery(&self) {
        let mut s = self.lock();
        s.battery_percent = 100;
        s.battery_clock.reset();
        self.publish(&s);
    }

    // ----- flight -----

    pub fn enter_sdk_mode(&self) {
        self.when_powered(|s| s.sdk_mode_active = true);
    }

    pub fn take_off(&self) {
        self.when_powered(|s| {
            if !s.sdk_mode_active || s.flight_state != FlightState::StandingBy {
                return;
            }
            s.motor_clock.start();
            s.flight_state = FlightState::TakingOff;
            s.height_cm = TAKEOFF_HEIGHT_CM;
            s.pose.z = s.height_cm;
            s.barometer_cm += s.height_cm as f64;
            s.flight_state = FlightState::InFlight;
        });
    }

    pub fn land(&self) {
        self.when_powered(|s| {
            let airborne = matches!(s.flight_state, FlightState::InFlight | FlightState::TakingOff);
            if !s.sdk_mode_active || !airborne {
                return;
            }
            s.flight_state = FlightState::Landing;
            s.motor_clock.stop();
            s.barometer_cm -= s.height_cm as f64;
            s.height_cm = 0;
            s.pose.z = 0;
            s.flight_state = FlightState::StandingBy;
        });
    }

    /// Motors cut in place. Nothing transitions out of `EmergencyStop` on its own.
    pub fn emergency_stop(&self) {
        self.when_powered(|s| {
            if !s.sdk_mode_active || s.flight_state == FlightState::StandingBy {
                return;
            }
            s.flight_state = FlightState::EmergencyStop;
            s.motor_clock.stop();
            s.height_cm = 0;
            s.pose.z = 0;
        });
    }

    // ----- movement -----

    pub fn set_speed(&self, speed: i32) -> Result<(), ValidationError> {
        let speed = SPEED.check("speed", speed)?;
        self.when_powered(|s| s.speed = speed);
        Ok(())
    }

    pub fn go_forward(&self, cm: i32) -> Result<(), ValidationError> {
        let cm = DISTANCE_CM.check("cm", cm)?;
        self.when_powered(|s| s.pose.y += cm);
        Ok(())
    }

    pub fn go_back(&self, cm: i32) -> Result<(), ValidationError> {
        let cm = DISTANCE_CM.check("cm", cm)?;
        self.when_powered(|s| s.pose.y -= cm);
        Ok(())
    }

    pub fn go_right(&self, cm: i32) -> Result<(), ValidationError> {
        let cm = DISTANCE_CM.check("cm", cm)?;
        self.when_powered(|s| s.pose.x += cm);
        Ok(())
    }

    pub fn go_left(&self, cm: i32) -> Result<(), ValidationError> {
        let cm = DISTANCE_CM.check("cm", cm)?;
        self.when_powered(|s| s.pose.x -= cm);
        Ok(())
    }

    pub fn go_up(&self, cm: i32) -> Result<(), ValidationError> {
        let cm = DISTANCE_CM.check("cm", cm)?;
        self.when_powered(|s| s.climb(cm));
        Ok(())
    }

    pub fn go_down(&self, cm: i32) -> Result<(), ValidationError> {
        let cm = DISTANCE_CM.check("cm", cm)?;
        self.when_powered(|s| s.climb(-cm));
        Ok(())
    }

    /// One correction only: heading lands in `[0, 360)` because the range is bounded.
    pub fn turn_clockwise(&self, degrees: i32) -> Result<(), ValidationError> {
        let degrees = ROTATION_DEG.check("degrees", degrees)?;
        self.when_powered(|s| {
            s.pose.heading += degrees;
            if s.pose.heading >= 360 {
                s.pose.heading -= 360;
            }
        });
        Ok(())
    }

    pub fn turn_counter_clockwise(&self, degrees: i32) -> Result<(), ValidationError> {
        let degrees = ROTATION_DEG.check("degrees", degrees)?;
        self.when_powered(|s| {
            s.pose.heading -= degrees;
            if s.pose.heading < 0 {
                s.pose.heading += 360;
            }
        });
        Ok(())
    }

    pub fn go(&self, x: i32, y: i32, z: i32, speed: i32) -> Result<(), ValidationError> {
        let x = OFFSET_CM.check("x", x)?;
        let y = OFFSET_CM.check("y", y)?;
        let z = OFFSET_CM.check("z", z)?;
        SPEED.check("speed", speed)?;
        self.when_powered(|s| {
            let distance = ((x * x + y * y) as f64).sqrt();
            debug!(x, y, z, speed, distance, "emulator: go");
            s.pose.x += x;
            s.pose.y += y;
            s.climb(z);
        });
        Ok(())
    }

    // ----- video -----

    pub fn start_video(&self) {
        let changed = self.when_powered(|s| !std::mem::replace(&mut s.video_on, true));
        if changed == Some(true) {
            self.video.start();
        }
    }

    pub fn stop_video(&self) {
        let changed = self.when_powered(|s| std::mem::replace(&mut s.video_on, false));
        if changed == Some(true) {
            self.video.stop();
        }
    }

    // ----- queries, -1 when unpowered -----

    pub fn get_speed(&self) -> i32 {
        let s = self.lock();
        if s.powered_up { s.speed } else { -1 }
    }

    pub fn get_battery(&self) -> i32 {
        let s = self.lock();
        if s.powered_up { s.battery_percent } else { -1 }
    }

    pub fn get_time(&self) -> i32 {
        let s = self.lock();
        if s.powered_up { s.motor_time_s() } else { -1 }
    }

    pub fn is_powered_up(&self) -> bool {
        self.lock().powered_up
    }

    /// The current power-on's cycle number, `None` while unpowered.
    pub fn power_cycle(&self) -> Option<u64> {
        let s = self.lock();
        s.powered_up.then_some(s.power_cycle)
    }

    pub fn is_sdk_mode_active(&self) -> bool {
        self.lock().sdk_mode_active
    }

    pub fn is_video_on(&self) -> bool {
        self.lock().video_on
    }

    pub fn flight_state(&self) -> FlightState {
        self.lock().flight_state
    }

    pub fn position(&self) -> Pose {
        self.lock().pose
    }

    pub fn height_cm(&self) -> i32 {
        self.lock().height_cm
    }

    pub fn barometer_cm(&self) -> f64 {
        self.lock().barometer_cm
    }

    /// Consistent snapshot of everything the state link reports.
    pub fn state(&self) -> TelloState {
        snapshot(&self.lock())
    }

    // ----- internals -----

    fn lock(&self) -> MutexGuard<'_, DroneState> {
        lock(&self.state)
    }

    fn when_powered<R>(&self, f: impl FnOnce(&mut DroneState) -> R) -> Option<R> {
        let mut s = self.lock();
        if !s.powered_up {
            return None;
        }
        let before = s.flight_state;
        let out = f(&mut s);
        let after = s.flight_state;
        self.publish(&s);
        drop(s);

        if before != after {
            info!(from = ?before, to = ?after, "emulator: flight state");
            let _ = self.events.send(EmulatorEvent::FlightStateChanged(after));
        }
        Some(out)
    }

    fn publish(&self, s: &DroneState) {
        self.telemetry.send_replace(snapshot(s));
    }

    /// Returns true when the battery just died.
    fn discharge_tick(&self) -> bool {
        let mut s = self.lock();
        if !s.powered_up {
            return false;
        }
        let used = s.battery_clock.elapsed().as_secs_f64() / self.battery_life.as_secs_f64();
        s.battery_percent = (100 - (used * 100.0) as i32).clamp(0, 100);
        let died = s.battery_percent < 1;
        self.publish(&s);
        died
    }
}

fn snapshot(s: &DroneState) -> TelloState {
    TelloState {
        ts_unix_ms: now_unix_ms(),
        height_cm: s.height_cm,
        barometer_cm: s.barometer_cm,
        battery_percent: s.battery_percent,
        motor_time_s: s.motor_time_s(),
        speed: s.speed,
    }
}

async fn discharge_battery(manager: Weak<StateManager>, tick: Duration) {
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        interval.tick().await;
        let Some(m) = manager.upgrade() else { break };
        if m.discharge_tick() {
            m.power_off();
            warn!("emulator: battery died");
            let _ = m.events.send(EmulatorEvent::BatteryDied);
        }
    }
    debug!("emulator: battery task ended");
}
