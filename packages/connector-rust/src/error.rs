/// Errors surfaced by service connections and the connector registry.
///
/// `Clone` because one handshake outcome is handed to every caller that was
/// waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectorError {
    #[error("service cannot be found: {identity}")]
    ServiceUnresolvable { identity: String },
    #[error("no handle returned from service {identity}")]
    NoHandleReturned { identity: String },
    #[error("service {identity} disconnected before the handshake completed")]
    Disconnected { identity: String },
    #[error("handshake with {identity} timed out after {timeout_ms}ms")]
    HandshakeTimeout { identity: String, timeout_ms: u64 },
    #[error("no service registered for action {action}")]
    NoMatchingService { action: String },
    #[error("descriptor has no component; resolve it before binding")]
    ImplicitDescriptor,
    #[error("connection driver for {identity} has stopped")]
    DriverStopped { identity: String },
}
