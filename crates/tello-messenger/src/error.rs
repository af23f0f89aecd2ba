#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,
    #[error("not connected")]
    NotConnected,
    #[error("receive timed out")]
    Timeout,
    #[error("receive failed: {0}")]
    Receive(String),
    #[error("send failed: {0}")]
    Send(String),
}

/// A required collaborator was not supplied when building a component.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{component}: missing required collaborator `{collaborator}`")]
pub struct ConstructionError {
    pub component: &'static str,
    pub collaborator: &'static str,
}

impl ConstructionError {
    pub fn missing(component: &'static str, collaborator: &'static str) -> Self {
        Self { component, collaborator }
    }
}
