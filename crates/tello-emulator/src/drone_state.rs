use std::time::Duration;
use tokio::time::Instant;

use crate::envelope::DEFAULT_SPEED;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlightState {
    StandingBy,
    TakingOff,
    InFlight,
    Landing,
    EmergencyStop,
}

/// Accumulating clock that can be paused and resumed.
#[derive(Debug, Clone, Default)]
pub struct Stopwatch {
    accumulated: Duration,
    started: Option<Instant>,
}

impl Stopwatch {
    pub fn start(&mut self) {
        if self.started.is_none() {
            self.started = Some(Instant::now());
        }
    }

    pub fn stop(&mut self) {
        if let Some(t) = self.started.take() {
            self.accumulated += t.elapsed();
        }
    }

    pub fn reset(&mut self) {
        self.accumulated = Duration::ZERO;
        if self.started.is_some() {
            self.started = Some(Instant::now());
        }
    }

    pub fn is_running(&self) -> bool {
        self.started.is_some()
    }

    pub fn elapsed(&self) -> Duration {
        self.accumulated + self.started.map(|t| t.elapsed()).unwrap_or_default()
    }
}

/// Simulated pose, relative to where the vehicle was powered on. Not heading-aware.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pose {
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub heading: i32,
}

/// Physical state of the simulated vehicle. Only `StateManager` mutates it.
#[derive(Debug, Clone)]
pub struct DroneState {
    pub powered_up: bool,
    /// Incremented by every power-on; 0 until the first.
    pub power_cycle: u64,
    pub sdk_mode_active: bool,
    pub video_on: bool,
    pub flight_state: FlightState,
    pub speed: i32,
    pub battery_percent: i32,
    pub height_cm: i32,
    pub barometer_cm: f64,
    pub pose: Pose,
    pub battery_clock: Stopwatch,
    pub motor_clock: Stopwatch,
}

impl Default for DroneState {
    fn default() -> Self {
        Self {
            powered_up: false,
            power_cycle: 0,
            sdk_mode_active: false,
            video_on: false,
            flight_state: FlightState::StandingBy,
            speed: DEFAULT_SPEED,
            battery_percent: 100,
            height_cm: 0,
            barometer_cm: 0.0,
            pose: Pose::default(),
            battery_clock: Stopwatch::default(),
            motor_clock: Stopwatch::default(),
        }
    }
}

impl DroneState {
    pub fn motor_time_s(&self) -> i32 {
        self.motor_clock.elapsed().as_secs() as i32
    }

    /// Vertical move; barometer follows, height stops at the ground.
    pub fn climb(&mut self, cm: i32) {
        self.barometer_cm += cm as f64;
        self.height_cm = (self.height_cm + cm).max(0);
        self.pose.z = self.height_cm;
    }
}
