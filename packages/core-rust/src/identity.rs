use std::fmt;

use crate::component::ComponentName;
use crate::descriptor::ServiceDescriptor;

/// Opaque key identifying one bindable endpoint.
///
/// Built from the component's short flattened name followed by an optional
/// suffix, so the same component can back several independent connections.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceIdentity(String);

impl ServiceIdentity {
    #[must_use]
    pub fn new(component: &ComponentName, suffix: &str) -> Self {
        let mut key = component.flatten_to_short_string();
        key.push_str(suffix);
        Self(key)
    }

    /// Identity for an explicit descriptor; `None` if no component is set.
    #[must_use]
    pub fn for_descriptor(descriptor: &ServiceDescriptor, suffix: &str) -> Option<Self> {
        descriptor
            .component
            .as_ref()
            .map(|component| Self::new(component, suffix))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ServiceIdentity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
