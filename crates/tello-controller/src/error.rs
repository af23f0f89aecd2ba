use tello_messenger::TransportError;
use tello_proto::Command;

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("vehicle rejected `{command}`: {reason}")]
    Rejected { command: Command, reason: String },

    #[error("malformed telemetry: {0}")]
    Telemetry(String),

    #[error("unexpected reply to `{0}`")]
    UnexpectedReply(Command),
}
