use serde::{Deserialize, Serialize};

use crate::component::ComponentName;

/// Describes the service a caller wants to bind to.
///
/// A descriptor is *implicit* when it only names an action and *explicit* once a
/// concrete component has been filled in. Only explicit descriptors can be
/// bound or used as a cache key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    /// Action the service is registered for, if the descriptor was built from one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// Concrete component to bind. `None` for implicit descriptors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<ComponentName>,
}

impl ServiceDescriptor {
    /// Implicit descriptor naming only an action.
    #[must_use]
    pub fn for_action(action: impl Into<String>) -> Self {
        Self {
            action: Some(action.into()),
            component: None,
        }
    }

    /// Explicit descriptor for a known component.
    #[must_use]
    pub fn for_component(component: ComponentName) -> Self {
        Self {
            action: None,
            component: Some(component),
        }
    }

    #[must_use]
    pub fn is_explicit(&self) -> bool {
        self.component.is_some()
    }

    /// Returns a copy with the component set, keeping the action.
    #[must_use]
    pub fn with_component(&self, component: ComponentName) -> Self {
        Self {
            action: self.action.clone(),
            component: Some(component),
        }
    }
}
