//! Single-fulfillment handshake result.
//!
//! A `HandshakeSettler` is held by the connection driver and settled exactly
//! once; any number of `Handshake` readers observe the same outcome.

use remoter_core::ServiceHandle;
use tokio::sync::watch;

use crate::error::ConnectorError;

pub(crate) type HandshakeOutcome = Result<ServiceHandle, ConnectorError>;

/// Write side of a handshake. Only the first `settle` takes effect.
#[derive(Debug)]
pub(crate) struct HandshakeSettler {
    tx: watch::Sender<Option<HandshakeOutcome>>,
}

/// Read side of a handshake. Clone freely; every clone sees the same outcome.
#[derive(Debug, Clone)]
pub(crate) struct Handshake {
    rx: watch::Receiver<Option<HandshakeOutcome>>,
}

impl HandshakeSettler {
    #[must_use]
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Returns a reader for this handshake.
    #[must_use]
    pub(crate) fn subscribe(&self) -> Handshake {
        Handshake {
            rx: self.tx.subscribe(),
        }
    }

    /// Records the outcome. Returns `false` if the handshake was already settled.
    pub(crate) fn settle(&self, outcome: HandshakeOutcome) -> bool {
        let mut outcome = Some(outcome);
        self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = outcome.take();
            true
        })
    }

    #[must_use]
    pub(crate) fn is_settled(&self) -> bool {
        self.tx.borrow().is_some()
    }
}

impl Default for HandshakeSettler {
    fn default() -> Self {
        Self::new()
    }
}

impl Handshake {
    /// Waits for the outcome.
    ///
    /// If the settler is dropped without settling, `on_abandon` is returned.
    pub(crate) async fn wait(mut self, on_abandon: ConnectorError) -> HandshakeOutcome {
        match self.rx.wait_for(Option::is_some).await {
            Ok(slot) => slot.clone().unwrap_or(Err(on_abandon)),
            Err(_) => Err(on_abandon),
        }
    }
}
