pub mod doctor;
pub mod position;

pub use position::{AltimeterCalibration, Position, Vector};
