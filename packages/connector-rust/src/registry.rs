//! Registry of service connections keyed by service identity.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::join_all;
use parking_lot::Mutex;
use remoter_core::{ServiceDescriptor, ServiceIdentity};
use tracing::{debug, info};

use crate::config::ConnectorConfig;
use crate::connection::ServiceConnection;
use crate::context::PlatformContext;
use crate::error::ConnectorError;

/// Cache of `ServiceConnection`s, one per service identity.
///
/// Owned by whatever component runs application startup and shutdown.
/// Connections are created on first request and live until `disconnect_all`.
/// The map lock is only held for lookup, insert, and clear; handshakes run
/// outside it, so a slow service never delays lookups of unrelated ones.
#[derive(Debug)]
pub struct ConnectorRegistry {
    context: PlatformContext,
    config: ConnectorConfig,
    connections: Mutex<HashMap<ServiceIdentity, Arc<ServiceConnection>>>,
}

impl ConnectorRegistry {
    #[must_use]
    pub fn new(context: PlatformContext, config: ConnectorConfig) -> Self {
        Self {
            context,
            config,
            connections: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn context(&self) -> &PlatformContext {
        &self.context
    }

    #[must_use]
    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    /// Returns the connection for `descriptor` plus `suffix`, creating it on
    /// first use.
    ///
    /// Implicit descriptors are resolved through the platform's service
    /// catalog first; the first matching component wins.
    ///
    /// # Errors
    ///
    /// Returns `NoMatchingService` if an action resolves to no component, or
    /// `ImplicitDescriptor` if the descriptor has neither component nor action.
    pub fn get(
        &self,
        descriptor: &ServiceDescriptor,
        suffix: &str,
    ) -> Result<Arc<ServiceConnection>, ConnectorError> {
        let descriptor = self.resolve(descriptor)?;
        let identity = ServiceIdentity::for_descriptor(&descriptor, suffix)
            .ok_or(ConnectorError::ImplicitDescriptor)?;

        let mut connections = self.connections.lock();
        let connection = connections.entry(identity).or_insert_with_key(|identity| {
            Arc::new(ServiceConnection::new(
                identity.clone(),
                descriptor,
                &self.context,
                &self.config,
            ))
        });
        Ok(Arc::clone(connection))
    }

    /// Returns the connection for the service registered under `action`.
    ///
    /// # Errors
    ///
    /// Returns `NoMatchingService` if no component answers to `action`.
    pub fn get_for_action(
        &self,
        action: &str,
        suffix: &str,
    ) -> Result<Arc<ServiceConnection>, ConnectorError> {
        self.get(&ServiceDescriptor::for_action(action), suffix)
    }

    /// Turns an implicit descriptor into an explicit one.
    ///
    /// # Errors
    ///
    /// See [`ConnectorRegistry::get`].
    pub fn resolve(
        &self,
        descriptor: &ServiceDescriptor,
    ) -> Result<ServiceDescriptor, ConnectorError> {
        if descriptor.is_explicit() {
            return Ok(descriptor.clone());
        }
        let Some(action) = descriptor.action.as_deref() else {
            return Err(ConnectorError::ImplicitDescriptor);
        };
        let component = self
            .context
            .resolver
            .query_services(action)
            .into_iter()
            .next()
            .ok_or_else(|| ConnectorError::NoMatchingService {
                action: action.to_string(),
            })?;
        debug!(action, component = %component, "resolved service action");
        Ok(descriptor.with_component(component))
    }

    /// Removes every cached connection and disconnects each of them.
    ///
    /// The map is swapped out in one step; connections requested after that
    /// point are new instances and are left alone. Connections with a
    /// handshake in flight finish it first. Returns the number of connections
    /// torn down.
    pub async fn disconnect_all(&self) -> usize {
        let drained = std::mem::take(&mut *self.connections.lock());
        let count = drained.len();

        join_all(drained.values().map(|connection| connection.disconnect())).await;

        info!(count, "disconnected all service connections");
        count
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.lock().is_empty()
    }

    #[must_use]
    pub fn contains(&self, identity: &ServiceIdentity) -> bool {
        self.connections.lock().contains_key(identity)
    }

    /// Identities currently cached, sorted.
    #[must_use]
    pub fn identities(&self) -> Vec<ServiceIdentity> {
        let mut identities: Vec<ServiceIdentity> =
            self.connections.lock().keys().cloned().collect();
        identities.sort();
        identities
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use remoter_core::ComponentName;

    use super::*;
    use crate::connection::ConnectionPhase;
    use crate::sim::{SimulatedBehavior, SimulatedBinder, SimulatedPlatform, SimulatedService};

    fn echo() -> ComponentName {
        ComponentName::new("com.example", "com.example.Echo")
    }

    fn mute() -> ComponentName {
        ComponentName::new("com.example", "com.example.Mute")
    }

    fn make_platform() -> Arc<SimulatedPlatform> {
        Arc::new(SimulatedPlatform::from_catalog([
            SimulatedService::new(echo()).with_action("remoter.ECHO"),
            SimulatedService::new(mute())
                .with_action("remoter.MUTE")
                .with_behavior(SimulatedBehavior::NullHandle),
        ]))
    }

    fn make_registry(platform: &Arc<SimulatedPlatform>) -> ConnectorRegistry {
        let context = PlatformContext::current(platform.clone(), platform.clone());
        ConnectorRegistry::new(context, ConnectorConfig::default())
    }

    fn echo_desc() -> ServiceDescriptor {
        ServiceDescriptor::for_component(echo())
    }

    #[tokio::test]
    async fn same_identity_returns_same_connection() {
        let platform = make_platform();
        let registry = make_registry(&platform);

        let a = registry.get(&echo_desc(), "").unwrap();
        let b = registry.get(&echo_desc(), "").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn different_identities_return_distinct_connections() {
        let platform = make_platform();
        let registry = make_registry(&platform);

        let plain = registry.get(&echo_desc(), "").unwrap();
        let suffixed = registry.get(&echo_desc(), "#2").unwrap();
        let other = registry
            .get(&ServiceDescriptor::for_component(mute()), "")
            .unwrap();

        assert!(!Arc::ptr_eq(&plain, &suffixed));
        assert!(!Arc::ptr_eq(&plain, &other));
        assert_eq!(suffixed.identity().as_str(), "com.example/.Echo#2");
        assert_eq!(registry.len(), 3);
        assert_eq!(
            registry.identities(),
            vec![
                ServiceIdentity::new(&echo(), ""),
                ServiceIdentity::new(&echo(), "#2"),
                ServiceIdentity::new(&mute(), ""),
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_gets_create_one_connection() {
        let platform = make_platform();
        let registry = Arc::new(make_registry(&platform));

        let mut tasks = Vec::new();
        for _ in 0..32 {
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move {
                registry.get(&echo_desc(), "").unwrap()
            }));
        }

        let mut connections = Vec::new();
        for task in tasks {
            connections.push(task.await.unwrap());
        }
        assert!(connections.iter().all(|c| Arc::ptr_eq(c, &connections[0])));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn get_for_action_resolves_first_match() {
        let platform = make_platform();
        let registry = make_registry(&platform);

        let by_action = registry.get_for_action("remoter.ECHO", "").unwrap();
        let by_component = registry.get(&echo_desc(), "").unwrap();
        assert!(Arc::ptr_eq(&by_action, &by_component));
        assert_eq!(by_action.descriptor().action.as_deref(), Some("remoter.ECHO"));
    }

    #[tokio::test]
    async fn unresolvable_action_is_an_error() {
        let platform = make_platform();
        let registry = make_registry(&platform);

        let err = registry.get_for_action("remoter.NOPE", "").unwrap_err();
        assert_eq!(
            err,
            ConnectorError::NoMatchingService {
                action: "remoter.NOPE".to_string()
            }
        );
        assert_eq!(
            registry.get(&ServiceDescriptor::default(), "").unwrap_err(),
            ConnectorError::ImplicitDescriptor
        );
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn registry_scenario_acquire_and_disconnect_all() {
        let platform = make_platform();
        let registry = make_registry(&platform);

        let a1 = registry.get(&echo_desc(), "").unwrap();
        let a2 = registry.get(&echo_desc(), "").unwrap();
        assert!(Arc::ptr_eq(&a1, &a2));

        let h1 = a1.acquire().await.unwrap();
        let h2 = a2.acquire().await.unwrap();
        assert!(h1.ptr_eq(&h2));
        assert_eq!(h1.downcast_ref::<SimulatedBinder>().unwrap().component, echo());
        assert_eq!(platform.bind_count(), 1);

        assert_eq!(registry.disconnect_all().await, 1);
        assert!(registry.is_empty());
        assert_eq!(platform.unbind_count(), 1);
        assert_eq!(a1.phase().await, ConnectionPhase::Disconnected);

        let fresh = registry.get(&echo_desc(), "").unwrap();
        assert!(!Arc::ptr_eq(&fresh, &a1));
        assert!(fresh.cached_handle().await.is_none());
        assert_eq!(fresh.phase().await, ConnectionPhase::Disconnected);
    }

    #[tokio::test]
    async fn disconnect_all_on_empty_registry() {
        let platform = make_platform();
        let registry = make_registry(&platform);
        assert_eq!(registry.disconnect_all().await, 0);
        assert_eq!(platform.unbind_count(), 0);
    }

    #[tokio::test]
    async fn disconnect_all_tears_down_every_connection() {
        let platform = make_platform();
        let registry = make_registry(&platform);

        let echo_conn = registry.get(&echo_desc(), "").unwrap();
        let echo_two = registry.get(&echo_desc(), "#2").unwrap();
        let mute_conn = registry.get_for_action("remoter.MUTE", "").unwrap();

        echo_conn.acquire().await.unwrap();
        echo_two.acquire().await.unwrap();
        assert!(matches!(
            mute_conn.acquire().await,
            Err(ConnectorError::NoHandleReturned { .. })
        ));
        assert_eq!(platform.active_bindings(&echo()), 2);

        assert_eq!(registry.disconnect_all().await, 3);
        // The mute service accepted its bind, so all three are released.
        assert_eq!(platform.unbind_count(), 3);
        assert_eq!(platform.active_bindings(&echo()), 0);
        assert_eq!(platform.active_bindings(&mute()), 0);
    }

    #[tokio::test]
    async fn killed_service_notifies_observer_through_registry() {
        let platform = make_platform();
        let registry = make_registry(&platform);
        let conn = registry.get_for_action("remoter.ECHO", "").unwrap();

        let disconnects = Arc::new(AtomicU32::new(0));
        let counter = disconnects.clone();
        conn.on_disconnect(Some(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })));

        let before = conn.acquire().await.unwrap();
        assert_eq!(platform.kill(&echo()), 1);

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while disconnects.load(Ordering::SeqCst) == 0 {
            assert!(tokio::time::Instant::now() < deadline);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(conn.cached_handle().await.is_none());

        // Reacquiring restarts the service with a new binder instance.
        let after = conn.acquire().await.unwrap();
        let before = before.downcast_ref::<SimulatedBinder>().unwrap();
        let after = after.downcast_ref::<SimulatedBinder>().unwrap();
        assert_ne!(before.instance, after.instance);
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);
        // Still the same cached connection.
        assert!(registry.contains(conn.identity()));
    }

    #[tokio::test]
    async fn slow_handshake_does_not_block_other_lookups() {
        let platform = Arc::new(
            SimulatedPlatform::from_catalog([
                SimulatedService::new(echo()),
                SimulatedService::new(mute()),
            ])
            .with_bind_latency(Duration::from_millis(200)),
        );
        let registry = Arc::new(make_registry(&platform));

        let slow = registry.get(&echo_desc(), "").unwrap();
        let pending = tokio::spawn(async move { slow.acquire().await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let started = std::time::Instant::now();
        let other = registry
            .get(&ServiceDescriptor::for_component(mute()), "")
            .unwrap();
        assert!(started.elapsed() < Duration::from_millis(100));
        assert_eq!(other.phase().await, ConnectionPhase::Disconnected);

        assert!(pending.await.unwrap().is_ok());
    }
}
