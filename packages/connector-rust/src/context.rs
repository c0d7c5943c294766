use std::fmt;
use std::sync::Arc;

use remoter_core::{BindPlatform, ServiceResolver};
use tokio::runtime::Handle;

/// Host facilities a registry needs: the bind primitive, the service catalog,
/// and the runtime that connection drivers are spawned on.
#[derive(Clone)]
pub struct PlatformContext {
    pub platform: Arc<dyn BindPlatform>,
    pub resolver: Arc<dyn ServiceResolver>,
    pub runtime: Handle,
}

impl PlatformContext {
    #[must_use]
    pub fn new(
        platform: Arc<dyn BindPlatform>,
        resolver: Arc<dyn ServiceResolver>,
        runtime: Handle,
    ) -> Self {
        Self {
            platform,
            resolver,
            runtime,
        }
    }

    /// Builds a context on the runtime of the calling task.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    #[must_use]
    pub fn current(platform: Arc<dyn BindPlatform>, resolver: Arc<dyn ServiceResolver>) -> Self {
        Self::new(platform, resolver, Handle::current())
    }
}

impl fmt::Debug for PlatformContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlatformContext")
            .field("runtime_flavor", &self.runtime.runtime_flavor())
            .finish_non_exhaustive()
    }
}
