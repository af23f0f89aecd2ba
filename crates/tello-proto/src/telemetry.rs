use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use time::OffsetDateTime;

/// Raw telemetry as reported by the vehicle's state link. All distances in cm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelloState {
    pub ts_unix_ms: i64,
    pub height_cm: i32,
    pub barometer_cm: f64,
    pub battery_percent: i32,
    pub motor_time_s: i32,
    pub speed: i32,
}

impl TelloState {
    pub fn timestamp(&self) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp_nanos(self.ts_unix_ms as i128 * 1_000_000)
            .unwrap_or(OffsetDateTime::UNIX_EPOCH)
    }
}

pub fn now_unix_ms() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// A received buffer plus arrival metadata, before any protocol parsing.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub payload: Bytes,
    pub received_at: OffsetDateTime,
}

impl Envelope {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self { payload: payload.into(), received_at: OffsetDateTime::now_utc() }
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    /// Monotonic, starts at 0.
    pub sequence: u64,
    /// Presentation time, `sequence / frame_rate`.
    pub timestamp: Duration,
    pub duration: Duration,
    pub payload: Bytes,
}

impl VideoFrame {
    pub fn new(payload: Bytes, sequence: u64, frame_rate: f64) -> Self {
        Self {
            sequence,
            timestamp: Duration::from_secs_f64(sequence as f64 / frame_rate),
            duration: Duration::from_secs_f64(1.0 / frame_rate),
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_timing_follows_sequence() {
        let f = VideoFrame::new(Bytes::from_static(b"x"), 30, 30.0);
        assert_eq!(f.timestamp, Duration::from_secs(1));
        assert_eq!(f.duration, Duration::from_secs_f64(1.0 / 30.0));
    }

    #[test]
    fn state_timestamp_from_unix_ms() {
        let s = TelloState {
            ts_unix_ms: 1_500,
            height_cm: 0,
            barometer_cm: 0.0,
            battery_percent: 100,
            motor_time_s: 0,
            speed: 10,
        };
        assert_eq!(s.timestamp().unix_timestamp(), 1);
        assert_eq!(s.timestamp().millisecond(), 500);
    }
}
