pub mod drone;
pub mod error;
pub mod flight_controller;

pub use drone::{Drone, DroneBuilder};
pub use error::ControllerError;
pub use flight_controller::{
    ConnectionStateChanged, FlightController, JsonStateDecoder, StateChanged, StateDecoder,
};
