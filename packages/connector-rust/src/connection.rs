//! Connection to a single out-of-process service.
//!
//! Each `ServiceConnection` owns a driver task fed by an unbounded command
//! channel. Caller operations (acquire, disconnect, observer registration) and
//! platform events (connected, disconnected) are all handed to the driver,
//! which applies them one at a time under the connection's state lock.
//!
//! The platform bind call runs on the blocking pool and the driver awaits its
//! return value. Waiting for the handshake itself happens on the caller side
//! through a shared `Handshake`, never while the state lock is held.
//!
//! The latest handshake is kept after it settles. An acquire issued before
//! that settlement shares its outcome instead of binding again, even when
//! the driver only gets to the request afterwards. A caller disconnect that
//! arrives while a handshake is in flight waits for it to settle and then
//! tears down.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use remoter_core::{
    BindCallback, BindOptions, BindPlatform, ComponentName, ServiceDescriptor, ServiceHandle,
    ServiceIdentity,
};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, info_span, trace, warn, Instrument};

use crate::config::ConnectorConfig;
use crate::context::PlatformContext;
use crate::error::ConnectorError;
use crate::handshake::{Handshake, HandshakeOutcome, HandshakeSettler};

/// Observer invoked with the handle each time a handshake succeeds.
pub type ConnectCallback = Arc<dyn Fn(&ServiceHandle) + Send + Sync>;

/// Observer invoked when the platform drops the service on its own.
pub type DisconnectCallback = Arc<dyn Fn() + Send + Sync>;

/// Lifecycle phase of a connection.
///
/// State machine: Disconnected -> Connecting -> Connected -> Disconnected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// No handle and no handshake in flight.
    Disconnected,
    /// A bind was dispatched and its outcome is pending.
    Connecting,
    /// A handle is cached.
    Connected,
}

// ---------------------------------------------------------------------------
// State and commands
// ---------------------------------------------------------------------------

struct ConnectionState {
    phase: ConnectionPhase,
    handle: Option<ServiceHandle>,
    bound: bool,
    /// Most recent handshake, settled or not.
    handshake: Option<HandshakeSettler>,
    /// Number of handshakes settled so far.
    settled: u64,
    /// Caller disconnects waiting for the in-flight handshake.
    deferred_disconnects: Vec<oneshot::Sender<()>>,
    on_connect: Option<ConnectCallback>,
    on_disconnect: Option<DisconnectCallback>,
}

impl ConnectionState {
    fn pending(&self) -> Option<&HandshakeSettler> {
        self.handshake.as_ref().filter(|handshake| !handshake.is_settled())
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self {
            phase: ConnectionPhase::Disconnected,
            handle: None,
            bound: false,
            handshake: None,
            settled: 0,
            deferred_disconnects: Vec::new(),
            on_connect: None,
            on_disconnect: None,
        }
    }
}

enum Command {
    /// `seen` is the settle count the caller observed before asking.
    Acquire {
        reply: oneshot::Sender<Acquired>,
        seen: u64,
    },
    Disconnect { done: oneshot::Sender<()> },
    SetConnectCallback(Option<ConnectCallback>),
    SetDisconnectCallback(Option<DisconnectCallback>),
    PlatformConnected { handle: Option<ServiceHandle> },
    PlatformDisconnected,
}

enum Acquired {
    Ready(ServiceHandle),
    Pending(Handshake),
}

// ---------------------------------------------------------------------------
// ServiceConnection
// ---------------------------------------------------------------------------

/// Binding relationship to one service endpoint.
///
/// Obtain instances through `ConnectorRegistry::get` so that equal identities
/// share one connection. Dropping the last reference stops the driver and
/// releases any active bind.
pub struct ServiceConnection {
    identity: ServiceIdentity,
    descriptor: ServiceDescriptor,
    state: Arc<Mutex<ConnectionState>>,
    commands: mpsc::UnboundedSender<Command>,
    handshake_timeout: Option<Duration>,
}

impl ServiceConnection {
    /// Creates a connection for an explicit descriptor and spawns its driver
    /// on the context's runtime.
    pub(crate) fn new(
        identity: ServiceIdentity,
        descriptor: ServiceDescriptor,
        context: &PlatformContext,
        config: &ConnectorConfig,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(ConnectionState::default()));

        let relay: Arc<dyn BindCallback> = Arc::new(BindingRelay {
            identity: identity.clone(),
            commands: tx.downgrade(),
        });

        let driver = ConnectionDriver {
            identity: identity.clone(),
            descriptor: descriptor.clone(),
            platform: Arc::clone(&context.platform),
            bind_options: config.bind_options,
            state: Arc::clone(&state),
            relay,
        };
        context.runtime.spawn(driver.run(rx));

        debug!(identity = %identity, "service connection created");

        Self {
            identity,
            descriptor,
            state,
            commands: tx,
            handshake_timeout: config.handshake_timeout,
        }
    }

    #[must_use]
    pub fn identity(&self) -> &ServiceIdentity {
        &self.identity
    }

    #[must_use]
    pub fn descriptor(&self) -> &ServiceDescriptor {
        &self.descriptor
    }

    /// Returns the service handle, binding to the service if necessary.
    ///
    /// A cached handle is returned without touching the platform. Otherwise
    /// the caller joins the in-flight handshake, starting one if none exists.
    ///
    /// # Errors
    ///
    /// - `ServiceUnresolvable` if the platform rejected the bind.
    /// - `NoHandleReturned` if the service connected without a handle.
    /// - `Disconnected` if the service went away before the handshake completed.
    /// - `HandshakeTimeout` if a timeout is configured and elapsed.
    /// - `DriverStopped` if the connection's driver is no longer running.
    pub async fn acquire(&self) -> Result<ServiceHandle, ConnectorError> {
        let seen = {
            let state = self.state.lock().await;
            if let Some(handle) = &state.handle {
                return Ok(handle.clone());
            }
            state.settled
        };

        let span = info_span!(
            "handshake",
            identity = %self.identity,
            outcome = tracing::field::Empty,
        );
        async move {
            let result = self.with_timeout(self.join_handshake(seen)).await;
            let outcome = match &result {
                Ok(_) => "connected",
                Err(_) => "failed",
            };
            tracing::Span::current().record("outcome", outcome);
            result
        }
        .instrument(span)
        .await
    }

    /// Unbinds from the service and drops the cached handle.
    ///
    /// If a handshake is in flight, waits for it to settle first; its waiters
    /// receive the platform's outcome. The disconnect observer is cleared
    /// afterwards, so later platform-side disconnects are not reported.
    /// Calling this on a disconnected connection is a no-op.
    pub async fn disconnect(&self) {
        let (done, rx) = oneshot::channel();
        if self.send(Command::Disconnect { done }).is_ok() {
            // A closed reply channel means the driver is gone, so there is
            // nothing left to tear down.
            let _ = rx.await;
        }
    }

    /// Registers the connect observer, replacing any previous one.
    /// `None` removes it.
    pub fn on_connect(&self, callback: Option<ConnectCallback>) {
        let _ = self.send(Command::SetConnectCallback(callback));
    }

    /// Registers the disconnect observer, replacing any previous one.
    /// `None` removes it.
    pub fn on_disconnect(&self, callback: Option<DisconnectCallback>) {
        let _ = self.send(Command::SetDisconnectCallback(callback));
    }

    pub async fn phase(&self) -> ConnectionPhase {
        self.state.lock().await.phase
    }

    /// Whether the platform currently holds an accepted bind for this connection.
    pub async fn is_bound(&self) -> bool {
        self.state.lock().await.bound
    }

    pub async fn cached_handle(&self) -> Option<ServiceHandle> {
        self.state.lock().await.handle.clone()
    }

    /// Asks the driver for the handle, then waits on the shared handshake if
    /// one is in flight.
    async fn join_handshake(&self, seen: u64) -> Result<ServiceHandle, ConnectorError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Acquire { reply, seen })?;
        match rx.await.map_err(|_| self.stopped())? {
            Acquired::Ready(handle) => Ok(handle),
            Acquired::Pending(handshake) => handshake.wait(self.stopped()).await,
        }
    }

    async fn with_timeout(
        &self,
        fut: impl Future<Output = Result<ServiceHandle, ConnectorError>>,
    ) -> Result<ServiceHandle, ConnectorError> {
        let Some(timeout) = self.handshake_timeout else {
            return fut.await;
        };
        match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result,
            Err(_elapsed) => {
                let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                warn!(identity = %self.identity, timeout_ms, "handshake timed out");
                Err(ConnectorError::HandshakeTimeout {
                    identity: self.identity.to_string(),
                    timeout_ms,
                })
            }
        }
    }

    fn send(&self, command: Command) -> Result<(), ConnectorError> {
        self.commands.send(command).map_err(|_| self.stopped())
    }

    fn stopped(&self) -> ConnectorError {
        ConnectorError::DriverStopped {
            identity: self.identity.to_string(),
        }
    }
}

impl fmt::Debug for ServiceConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConnection")
            .field("identity", &self.identity)
            .field("descriptor", &self.descriptor)
            .field("handshake_timeout", &self.handshake_timeout)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// BindingRelay
// ---------------------------------------------------------------------------

/// Platform-facing callback. Forwards every notification to the driver and
/// does nothing else, whatever thread the platform calls it on.
///
/// Holds a weak sender so that a binding left behind in the platform does not
/// keep the driver alive.
struct BindingRelay {
    identity: ServiceIdentity,
    commands: mpsc::WeakUnboundedSender<Command>,
}

impl BindingRelay {
    fn forward(&self, command: Command) {
        match self.commands.upgrade() {
            Some(tx) => {
                let _ = tx.send(command);
            }
            None => trace!(identity = %self.identity, "platform event for dropped connection"),
        }
    }
}

impl BindCallback for BindingRelay {
    fn on_connected(&self, component: &ComponentName, handle: Option<ServiceHandle>) {
        debug!(
            identity = %self.identity,
            component = %component,
            has_handle = handle.is_some(),
            "onServiceConnected"
        );
        self.forward(Command::PlatformConnected { handle });
    }

    fn on_disconnected(&self, component: &ComponentName) {
        debug!(identity = %self.identity, component = %component, "onServiceDisconnected");
        self.forward(Command::PlatformDisconnected);
    }
}

// ---------------------------------------------------------------------------
// ConnectionDriver
// ---------------------------------------------------------------------------

/// Single writer of a connection's state.
struct ConnectionDriver {
    identity: ServiceIdentity,
    descriptor: ServiceDescriptor,
    platform: Arc<dyn BindPlatform>,
    bind_options: BindOptions,
    state: Arc<Mutex<ConnectionState>>,
    relay: Arc<dyn BindCallback>,
}

impl ConnectionDriver {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = rx.recv().await {
            self.apply(command).await;
        }

        // The owning connection is gone; release the platform side.
        let mut state = self.state.lock().await;
        if state.bound {
            self.platform.unbind(&self.relay);
            state.bound = false;
        }
        debug!(identity = %self.identity, "connection driver stopped");
    }

    async fn apply(&self, command: Command) {
        match command {
            Command::Acquire { reply, seen } => self.acquire(reply, seen).await,
            Command::Disconnect { done } => self.disconnect(done).await,
            Command::SetConnectCallback(callback) => {
                self.state.lock().await.on_connect = callback;
            }
            Command::SetDisconnectCallback(callback) => {
                self.state.lock().await.on_disconnect = callback;
            }
            Command::PlatformConnected { handle } => self.platform_connected(handle).await,
            Command::PlatformDisconnected => self.platform_disconnected().await,
        }
    }

    async fn acquire(&self, reply: oneshot::Sender<Acquired>, seen: u64) {
        let mut state = self.state.lock().await;
        if let Some(handle) = &state.handle {
            let _ = reply.send(Acquired::Ready(handle.clone()));
            return;
        }
        if let Some(latest) = &state.handshake {
            // Still in flight, or settled after the caller checked the cache:
            // either way the caller was concurrent with it.
            if !latest.is_settled() || state.settled > seen {
                trace!(identity = %self.identity, "joining latest handshake");
                let _ = reply.send(Acquired::Pending(latest.subscribe()));
                return;
            }
        }

        // A bind accepted earlier without ever yielding a handle is released
        // before asking again.
        if state.bound {
            self.platform.unbind(&self.relay);
            state.bound = false;
        }

        let settler = HandshakeSettler::new();
        // The caller may have given up waiting; the handshake proceeds regardless.
        let _ = reply.send(Acquired::Pending(settler.subscribe()));
        state.handshake = Some(settler);
        state.phase = ConnectionPhase::Connecting;
        drop(state);

        // Platform events arriving during the bind call queue up behind it, so
        // they always observe the final bound flag.
        let accepted = self.bind().await;

        let mut state = self.state.lock().await;
        state.bound = accepted;
        debug!(identity = %self.identity, bound = accepted, "connecting with service");
        if accepted {
            return;
        }

        warn!(identity = %self.identity, "bind rejected by platform");
        if state.handle.is_none() {
            state.phase = ConnectionPhase::Disconnected;
        }
        let outcome = Err(ConnectorError::ServiceUnresolvable {
            identity: self.identity.to_string(),
        });
        self.settle(&mut state, outcome);
    }

    /// Runs the platform bind on the blocking pool. A panicking bind counts
    /// as a rejection.
    async fn bind(&self) -> bool {
        let platform = Arc::clone(&self.platform);
        let descriptor = self.descriptor.clone();
        let options = self.bind_options;
        let relay = Arc::clone(&self.relay);

        debug!(identity = %self.identity, auto_create = options.auto_create, "dispatching bind");
        match tokio::task::spawn_blocking(move || platform.bind(&descriptor, options, relay)).await
        {
            Ok(accepted) => accepted,
            Err(err) => {
                warn!(identity = %self.identity, error = %err, "bind task failed");
                false
            }
        }
    }

    async fn platform_connected(&self, handle: Option<ServiceHandle>) {
        let mut state = self.state.lock().await;
        let Some(handle) = handle else {
            warn!(identity = %self.identity, "service connected without a handle");
            if state.handle.is_none() {
                state.phase = ConnectionPhase::Disconnected;
            }
            let outcome = Err(ConnectorError::NoHandleReturned {
                identity: self.identity.to_string(),
            });
            self.settle(&mut state, outcome);
            return;
        };

        // The handle is cached before the handshake settles, so no reader can
        // observe a settled handshake without a cached handle.
        state.handle = Some(handle.clone());
        state.phase = ConnectionPhase::Connected;
        let on_connect = state.on_connect.clone();
        self.settle(&mut state, Ok(handle.clone()));
        drop(state);

        info!(identity = %self.identity, "service connected");
        if let Some(callback) = on_connect {
            callback(&handle);
        }
    }

    async fn platform_disconnected(&self) {
        let mut state = self.state.lock().await;
        let on_disconnect = state.on_disconnect.clone();
        if state.bound {
            self.platform.unbind(&self.relay);
            state.bound = false;
        }
        state.handle = None;
        state.phase = ConnectionPhase::Disconnected;
        let outcome = Err(ConnectorError::Disconnected {
            identity: self.identity.to_string(),
        });
        self.settle(&mut state, outcome);
        drop(state);

        info!(identity = %self.identity, "service disconnected by platform");
        if let Some(callback) = on_disconnect {
            callback();
        }
    }

    async fn disconnect(&self, done: oneshot::Sender<()>) {
        let mut state = self.state.lock().await;
        if state.pending().is_some() {
            debug!(identity = %self.identity, "disconnect waits for in-flight handshake");
            state.deferred_disconnects.push(done);
            return;
        }
        self.teardown(&mut state);
        drop(state);
        let _ = done.send(());
    }

    /// Settles the latest handshake, then runs any disconnect that was
    /// waiting on it. Does nothing if the handshake already settled.
    fn settle(&self, state: &mut ConnectionState, outcome: HandshakeOutcome) {
        let Some(handshake) = &state.handshake else {
            return;
        };
        if !handshake.settle(outcome) {
            return;
        }
        state.settled += 1;

        if state.deferred_disconnects.is_empty() {
            return;
        }
        self.teardown(state);
        for done in state.deferred_disconnects.drain(..) {
            let _ = done.send(());
        }
    }

    fn teardown(&self, state: &mut ConnectionState) {
        if state.bound {
            self.platform.unbind(&self.relay);
            state.bound = false;
        }
        state.handle = None;
        state.phase = ConnectionPhase::Disconnected;
        state.on_disconnect = None;
        debug!(identity = %self.identity, "service disconnected");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
