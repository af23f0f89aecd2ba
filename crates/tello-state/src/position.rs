use serde::{Deserialize, Serialize};
use std::fmt;
use tello_proto::TelloState;
use time::OffsetDateTime;

const CM_PER_FOOT: f64 = 30.48;

/// Offset between the barometric altimeter and true altitude.
///
/// Produced once by calibrating against a known altitude and then passed to
/// every `Position` built from raw telemetry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AltimeterCalibration {
    delta_cm: f64,
}

impl AltimeterCalibration {
    pub fn new(barometric_altitude_cm: f64, actual_altitude_cm: f64) -> Self {
        Self { delta_cm: actual_altitude_cm - barometric_altitude_cm }
    }

    pub fn delta_cm(&self) -> f64 {
        self.delta_cm
    }

    pub fn apply(&self, barometric_cm: f64) -> f64 {
        barometric_cm + self.delta_cm
    }
}

/// Dead-reckoning pose relative to the session origin.
///
/// Heading 0 faces +Y; positive x is to the right of that.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector {
    pub heading: i32,
    pub x: f64,
    pub y: f64,
}

impl Vector {
    pub fn turn(self, degrees: i32) -> Self {
        Self { heading: (self.heading + degrees).rem_euclid(360), ..self }
    }

    /// Move by a body-frame offset, rotated into the session frame by the current heading.
    pub fn translate(self, right_cm: f64, forward_cm: f64) -> Self {
        let (sin, cos) = (self.heading as f64).to_radians().sin_cos();
        Self {
            heading: self.heading,
            x: self.x + right_cm * cos + forward_cm * sin,
            y: self.y - right_cm * sin + forward_cm * cos,
        }
    }
}

/// Immutable pose snapshot derived from one telemetry update.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Position {
    altitude_agl_cm: i32,
    altitude_msl_cm: f64,
    heading: i32,
    x: f64,
    y: f64,
    timestamp: OffsetDateTime,
    altitude_delta_cm: f64,
}

impl Position {
    /// Pose with heading and planar offsets at the origin.
    pub fn from_state(state: &TelloState, calibration: &AltimeterCalibration) -> Self {
        Self::with_vector(state, &Vector::default(), calibration)
    }

    pub fn with_vector(
        state: &TelloState,
        vector: &Vector,
        calibration: &AltimeterCalibration,
    ) -> Self {
        Self {
            altitude_agl_cm: state.height_cm.max(0),
            altitude_msl_cm: calibration.apply(state.barometer_cm),
            heading: vector.heading.rem_euclid(360),
            x: vector.x,
            y: vector.y,
            timestamp: state.timestamp(),
            altitude_delta_cm: calibration.delta_cm(),
        }
    }

    /// Above ground level, cm. Never negative.
    pub fn altitude_agl_cm(&self) -> i32 {
        self.altitude_agl_cm
    }

    /// Mean sea level, cm. Only meaningful after the altimeter was calibrated.
    pub fn altitude_msl_cm(&self) -> f64 {
        self.altitude_msl_cm
    }

    /// Degrees from the starting orientation, not from north. In `[0, 360)`.
    pub fn heading(&self) -> i32 {
        self.heading
    }

    pub fn x(&self) -> f64 {
        self.x
    }

    pub fn y(&self) -> f64 {
        self.y
    }

    pub fn timestamp(&self) -> OffsetDateTime {
        self.timestamp
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "X: {:.2} cm, Y: {:.2} cm, MSL: {:.2} ft, AGL: {} cm, Hd: {} deg, AD: {:.2} cm",
            self.x,
            self.y,
            self.altitude_msl_cm / CM_PER_FOOT,
            self.altitude_agl_cm,
            self.heading,
            self.altitude_delta_cm,
        )
    }
}
