use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::component::ComponentName;
use crate::descriptor::ServiceDescriptor;
use crate::handle::ServiceHandle;

/// Flags passed along with a bind request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindOptions {
    /// Ask the platform to start the service if it is not already running.
    pub auto_create: bool,
}

impl Default for BindOptions {
    fn default() -> Self {
        Self { auto_create: true }
    }
}

/// Receiver of platform bind notifications.
///
/// The platform may invoke these methods on any thread, at any time after a
/// bind request was accepted. Implementations must not block.
pub trait BindCallback: Send + Sync {
    /// The service is up. `handle` is `None` if the service refused to hand
    /// out a communication object.
    fn on_connected(&self, component: &ComponentName, handle: Option<ServiceHandle>);

    /// The hosting process went away without the caller asking.
    fn on_disconnected(&self, component: &ComponentName);
}

/// Host platform primitive for binding to out-of-process services.
pub trait BindPlatform: Send + Sync {
    /// Requests a bind. Returns `true` if the platform accepted the request;
    /// the outcome is then delivered later through `callback`.
    ///
    /// May block for a long time; callers run it off their own scheduling thread.
    fn bind(
        &self,
        descriptor: &ServiceDescriptor,
        options: BindOptions,
        callback: Arc<dyn BindCallback>,
    ) -> bool;

    /// Releases a bind previously accepted for `callback`.
    fn unbind(&self, callback: &Arc<dyn BindCallback>);
}

/// Service catalog lookup used to turn an action into a concrete component.
pub trait ServiceResolver: Send + Sync {
    /// Returns every component registered for `action`, best match first.
    fn query_services(&self, action: &str) -> Vec<ComponentName>;
}
