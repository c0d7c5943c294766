//! Remoter Connector — deduplicated, cached connections to out-of-process services.
//!
//! A `ConnectorRegistry` hands out one `ServiceConnection` per service
//! identity. Each connection binds through the host's `BindPlatform` at most
//! once per handshake, caches the resulting handle, and reports connects and
//! platform-initiated disconnects to registered observers.

pub mod config;
pub mod connection;
pub mod context;
pub mod error;
mod handshake;
pub mod registry;
pub mod sim;

pub use config::ConnectorConfig;
pub use connection::{ConnectCallback, ConnectionPhase, DisconnectCallback, ServiceConnection};
pub use context::PlatformContext;
pub use error::ConnectorError;
pub use registry::ConnectorRegistry;
pub use sim::{SimulatedBehavior, SimulatedBinder, SimulatedPlatform, SimulatedService};
