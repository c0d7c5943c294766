//! In-process platform for hosts without a real binding service.
//!
//! `SimulatedPlatform` implements both `BindPlatform` and `ServiceResolver`
//! over a catalog of `SimulatedService` entries. Binds are answered on the
//! calling (blocking) thread after an optional artificial latency, and
//! `kill()` fires platform-initiated disconnects the way a crashed service
//! process would.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use dashmap::DashMap;
use parking_lot::Mutex;
use remoter_core::{
    BindCallback, BindOptions, BindPlatform, ComponentName, ServiceDescriptor, ServiceHandle,
    ServiceResolver,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

/// How a simulated service answers a bind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulatedBehavior {
    /// Accept and deliver a fresh `SimulatedBinder`.
    #[default]
    Deliver,
    /// Accept and deliver no handle.
    NullHandle,
    /// Refuse the bind.
    Reject,
}

/// Catalog entry for one simulated service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulatedService {
    pub component: ComponentName,
    /// Actions this service answers to, for `ServiceResolver` lookups.
    #[serde(default)]
    pub actions: Vec<String>,
    #[serde(default)]
    pub behavior: SimulatedBehavior,
}

impl SimulatedService {
    #[must_use]
    pub fn new(component: ComponentName) -> Self {
        Self {
            component,
            actions: Vec::new(),
            behavior: SimulatedBehavior::Deliver,
        }
    }

    #[must_use]
    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.actions.push(action.into());
        self
    }

    #[must_use]
    pub fn with_behavior(mut self, behavior: SimulatedBehavior) -> Self {
        self.behavior = behavior;
        self
    }
}

/// Handle payload delivered by the simulated platform.
///
/// A new `instance` is minted for every successful bind, so a reconnect is
/// distinguishable from the original connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedBinder {
    pub component: ComponentName,
    pub instance: Uuid,
}

struct SimulatedBinding {
    component: ComponentName,
    callback: Arc<dyn BindCallback>,
    /// Bound without auto-create to a stopped service; delivered on `start()`.
    waiting: bool,
}

/// Deterministic in-process `BindPlatform`.
pub struct SimulatedPlatform {
    services: DashMap<ComponentName, SimulatedService>,
    running: DashMap<ComponentName, ()>,
    bindings: Mutex<Vec<SimulatedBinding>>,
    bind_latency: Option<Duration>,
    bind_calls: AtomicU64,
    unbind_calls: AtomicU64,
}

impl SimulatedPlatform {
    #[must_use]
    pub fn new() -> Self {
        Self {
            services: DashMap::new(),
            running: DashMap::new(),
            bindings: Mutex::new(Vec::new()),
            bind_latency: None,
            bind_calls: AtomicU64::new(0),
            unbind_calls: AtomicU64::new(0),
        }
    }

    /// Builds a platform pre-populated with `services`.
    #[must_use]
    pub fn from_catalog(services: impl IntoIterator<Item = SimulatedService>) -> Self {
        let platform = Self::new();
        for service in services {
            platform.register(service);
        }
        platform
    }

    /// Reads a JSON array of `SimulatedService` entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not a valid catalog.
    pub fn load_catalog(path: &Path) -> anyhow::Result<Vec<SimulatedService>> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading catalog {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing catalog {}", path.display()))
    }

    /// Delays every bind answer by `latency`, simulating a slow service start.
    #[must_use]
    pub fn with_bind_latency(mut self, latency: Duration) -> Self {
        self.bind_latency = Some(latency);
        self
    }

    /// Adds or replaces a catalog entry.
    pub fn register(&self, service: SimulatedService) {
        self.services.insert(service.component.clone(), service);
    }

    #[must_use]
    pub fn bind_count(&self) -> u64 {
        self.bind_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn unbind_count(&self) -> u64 {
        self.unbind_calls.load(Ordering::SeqCst)
    }

    /// Number of binds currently held against `component`.
    #[must_use]
    pub fn active_bindings(&self, component: &ComponentName) -> usize {
        self.bindings
            .lock()
            .iter()
            .filter(|binding| &binding.component == component)
            .count()
    }

    #[must_use]
    pub fn is_running(&self, component: &ComponentName) -> bool {
        self.running.contains_key(component)
    }

    /// Starts a stopped service and connects every binding waiting on it.
    pub fn start(&self, component: &ComponentName) {
        self.running.insert(component.clone(), ());
        let waiting: Vec<Arc<dyn BindCallback>> = {
            let mut bindings = self.bindings.lock();
            bindings
                .iter_mut()
                .filter(|binding| binding.waiting && &binding.component == component)
                .map(|binding| {
                    binding.waiting = false;
                    Arc::clone(&binding.callback)
                })
                .collect()
        };
        info!(component = %component, waiting = waiting.len(), "simulated service started");
        for callback in waiting {
            self.deliver(component, callback.as_ref());
        }
    }

    /// Stops a service as if its process died, notifying every binding.
    ///
    /// Bindings stay registered until their owners unbind. Returns the number
    /// of callbacks notified.
    pub fn kill(&self, component: &ComponentName) -> usize {
        self.running.remove(component);
        let callbacks: Vec<Arc<dyn BindCallback>> = self
            .bindings
            .lock()
            .iter()
            .filter(|binding| &binding.component == component && !binding.waiting)
            .map(|binding| Arc::clone(&binding.callback))
            .collect();
        info!(component = %component, bindings = callbacks.len(), "simulated service killed");
        for callback in &callbacks {
            callback.on_disconnected(component);
        }
        callbacks.len()
    }

    fn deliver(&self, component: &ComponentName, callback: &dyn BindCallback) {
        let behavior = self
            .services
            .get(component)
            .map(|service| service.behavior)
            .unwrap_or_default();
        let handle = match behavior {
            SimulatedBehavior::NullHandle => None,
            _ => Some(ServiceHandle::new(SimulatedBinder {
                component: component.clone(),
                instance: Uuid::new_v4(),
            })),
        };
        callback.on_connected(component, handle);
    }
}

impl Default for SimulatedPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl BindPlatform for SimulatedPlatform {
    fn bind(
        &self,
        descriptor: &ServiceDescriptor,
        options: BindOptions,
        callback: Arc<dyn BindCallback>,
    ) -> bool {
        self.bind_calls.fetch_add(1, Ordering::SeqCst);

        let Some(component) = descriptor.component.as_ref() else {
            debug!("simulated bind rejected: implicit descriptor");
            return false;
        };
        let behavior = match self.services.get(component) {
            Some(service) => service.behavior,
            None => {
                debug!(component = %component, "simulated bind rejected: unknown component");
                return false;
            }
        };
        if behavior == SimulatedBehavior::Reject {
            debug!(component = %component, "simulated bind rejected by service");
            return false;
        }

        if let Some(latency) = self.bind_latency {
            std::thread::sleep(latency);
        }

        let waiting = !options.auto_create && !self.is_running(component);
        if options.auto_create {
            self.running.insert(component.clone(), ());
        }
        self.bindings.lock().push(SimulatedBinding {
            component: component.clone(),
            callback: Arc::clone(&callback),
            waiting,
        });

        if !waiting {
            self.deliver(component, callback.as_ref());
        }
        true
    }

    fn unbind(&self, callback: &Arc<dyn BindCallback>) {
        self.unbind_calls.fetch_add(1, Ordering::SeqCst);
        let target = Arc::as_ptr(callback).cast::<()>();
        self.bindings
            .lock()
            .retain(|binding| Arc::as_ptr(&binding.callback).cast::<()>() != target);
    }
}

impl ServiceResolver for SimulatedPlatform {
    fn query_services(&self, action: &str) -> Vec<ComponentName> {
        let mut matches: Vec<ComponentName> = self
            .services
            .iter()
            .filter(|entry| entry.value().actions.iter().any(|a| a == action))
            .map(|entry| entry.key().clone())
            .collect();
        // DashMap iteration order is arbitrary; keep answers stable.
        matches.sort();
        matches
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;
    use std::sync::atomic::AtomicU32;

    use super::*;

    #[derive(Default)]
    struct RecordingCallback {
        connected: Mutex<Vec<Option<ServiceHandle>>>,
        disconnected: AtomicU32,
    }

    impl BindCallback for RecordingCallback {
        fn on_connected(&self, _component: &ComponentName, handle: Option<ServiceHandle>) {
            self.connected.lock().push(handle);
        }

        fn on_disconnected(&self, _component: &ComponentName) {
            self.disconnected.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn echo() -> ComponentName {
        ComponentName::new("com.example", "com.example.Echo")
    }

    fn bind(platform: &SimulatedPlatform, options: BindOptions) -> (bool, Arc<RecordingCallback>) {
        let recorder = Arc::new(RecordingCallback::default());
        let callback: Arc<dyn BindCallback> = recorder.clone();
        let accepted = platform.bind(
            &ServiceDescriptor::for_component(echo()),
            options,
            callback,
        );
        (accepted, recorder)
    }

    #[test]
    fn deliver_hands_out_fresh_binders() {
        let platform = SimulatedPlatform::from_catalog([SimulatedService::new(echo())]);

        let (accepted, first) = bind(&platform, BindOptions::default());
        assert!(accepted);
        let (_, second) = bind(&platform, BindOptions::default());

        let a = first.connected.lock()[0].clone().unwrap();
        let b = second.connected.lock()[0].clone().unwrap();
        let a = a.downcast_ref::<SimulatedBinder>().unwrap();
        let b = b.downcast_ref::<SimulatedBinder>().unwrap();
        assert_eq!(a.component, echo());
        assert_ne!(a.instance, b.instance);
        assert_eq!(platform.bind_count(), 2);
        assert_eq!(platform.active_bindings(&echo()), 2);
    }

    #[test]
    fn unknown_component_is_rejected() {
        let platform = SimulatedPlatform::new();
        let (accepted, recorder) = bind(&platform, BindOptions::default());
        assert!(!accepted);
        assert!(recorder.connected.lock().is_empty());
        assert_eq!(platform.active_bindings(&echo()), 0);
    }

    #[test]
    fn reject_and_null_behaviors() {
        let platform = SimulatedPlatform::from_catalog([
            SimulatedService::new(echo()).with_behavior(SimulatedBehavior::Reject)
        ]);
        assert!(!bind(&platform, BindOptions::default()).0);

        platform.register(SimulatedService::new(echo()).with_behavior(SimulatedBehavior::NullHandle));
        let (accepted, recorder) = bind(&platform, BindOptions::default());
        assert!(accepted);
        assert!(recorder.connected.lock()[0].is_none());
    }

    #[test]
    fn bind_without_auto_create_waits_for_start() {
        let platform = SimulatedPlatform::from_catalog([SimulatedService::new(echo())]);
        let (accepted, recorder) = bind(&platform, BindOptions { auto_create: false });
        assert!(accepted);
        assert!(recorder.connected.lock().is_empty());
        assert!(!platform.is_running(&echo()));

        platform.start(&echo());
        assert!(platform.is_running(&echo()));
        assert_eq!(recorder.connected.lock().len(), 1);
    }

    #[test]
    fn kill_notifies_every_binding() {
        let platform = SimulatedPlatform::from_catalog([SimulatedService::new(echo())]);
        let (_, first) = bind(&platform, BindOptions::default());
        let (_, second) = bind(&platform, BindOptions::default());

        assert_eq!(platform.kill(&echo()), 2);
        assert_eq!(first.disconnected.load(Ordering::SeqCst), 1);
        assert_eq!(second.disconnected.load(Ordering::SeqCst), 1);
        assert!(!platform.is_running(&echo()));
    }

    #[test]
    fn unbind_removes_only_that_binding() {
        let platform = SimulatedPlatform::from_catalog([SimulatedService::new(echo())]);
        let first: Arc<dyn BindCallback> = Arc::new(RecordingCallback::default());
        let second: Arc<dyn BindCallback> = Arc::new(RecordingCallback::default());
        let desc = ServiceDescriptor::for_component(echo());
        platform.bind(&desc, BindOptions::default(), Arc::clone(&first));
        platform.bind(&desc, BindOptions::default(), Arc::clone(&second));

        platform.unbind(&first);
        assert_eq!(platform.active_bindings(&echo()), 1);
        assert_eq!(platform.unbind_count(), 1);
    }

    #[test]
    fn resolver_matches_actions_in_stable_order() {
        let b = ComponentName::new("b.pkg", "b.pkg.Svc");
        let a = ComponentName::new("a.pkg", "a.pkg.Svc");
        let platform = SimulatedPlatform::from_catalog([
            SimulatedService::new(b.clone()).with_action("remoter.ECHO"),
            SimulatedService::new(a.clone()).with_action("remoter.ECHO"),
            SimulatedService::new(echo()).with_action("remoter.OTHER"),
        ]);

        assert_eq!(platform.query_services("remoter.ECHO"), vec![a, b]);
        assert!(platform.query_services("remoter.NONE").is_empty());
    }

    #[test]
    fn load_catalog_from_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[
                {{"component": {{"package": "com.example", "class": "com.example.Echo"}},
                  "actions": ["remoter.ECHO"]}},
                {{"component": {{"package": "com.example", "class": "com.example.Mute"}},
                  "behavior": "null_handle"}}
            ]"#
        )
        .unwrap();

        let catalog = SimulatedPlatform::load_catalog(file.path()).unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog[0].behavior, SimulatedBehavior::Deliver);
        assert_eq!(catalog[0].actions, vec!["remoter.ECHO"]);
        assert_eq!(catalog[1].behavior, SimulatedBehavior::NullHandle);
    }

    #[test]
    fn load_catalog_reports_bad_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        let err = SimulatedPlatform::load_catalog(file.path()).unwrap_err();
        assert!(err.to_string().starts_with("parsing catalog"));
    }
}
