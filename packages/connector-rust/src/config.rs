//! Connector configuration.

use std::time::Duration;

use remoter_core::BindOptions;

/// Settings shared by every connection created through a registry.
#[derive(Debug, Clone, Default)]
pub struct ConnectorConfig {
    /// Upper bound on how long a single `acquire()` waits for the handshake.
    /// `None` waits indefinitely. The handshake itself is never cancelled.
    pub handshake_timeout: Option<Duration>,
    /// Flags passed to the platform with every bind request.
    pub bind_options: BindOptions,
}

impl ConnectorConfig {
    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = Some(timeout);
        self
    }
}
