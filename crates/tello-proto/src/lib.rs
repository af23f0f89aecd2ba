pub mod command;
pub mod telemetry;

pub use command::{Command, ParseCommandError, Response};
pub use telemetry::{Envelope, TelloState, VideoFrame};
