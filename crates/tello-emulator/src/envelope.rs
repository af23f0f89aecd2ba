/// An argument fell outside its documented closed range.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{argument} = {value} is outside [{min}, {max}]")]
pub struct ValidationError {
    pub argument: &'static str,
    pub value: i32,
    pub min: i32,
    pub max: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limit {
    pub min: i32,
    pub max: i32,
}

impl Limit {
    pub const fn new(min: i32, max: i32) -> Self {
        Self { min, max }
    }

    pub fn check(&self, argument: &'static str, value: i32) -> Result<i32, ValidationError> {
        if (self.min..=self.max).contains(&value) {
            Ok(value)
        } else {
            Err(ValidationError { argument, value, min: self.min, max: self.max })
        }
    }
}

/// Single-axis move, cm.
pub const DISTANCE_CM: Limit = Limit::new(20, 500);
/// Rotation, degrees.
pub const ROTATION_DEG: Limit = Limit::new(1, 360);
/// cm/s.
pub const SPEED: Limit = Limit::new(10, 100);
/// Per-axis offset for `go`, cm.
pub const OFFSET_CM: Limit = Limit::new(-500, 500);

pub const DEFAULT_SPEED: i32 = 10;
