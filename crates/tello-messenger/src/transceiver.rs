use async_trait::async_trait;
use tello_proto::{Command, Response};

use crate::TransportError;

/// Command link to the vehicle.
#[async_trait]
pub trait Transceiver: Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;

    async fn disconnect(&self);

    /// Send one command and wait for the vehicle's reply.
    async fn send(&self, command: Command) -> Result<Response, TransportError>;
}
