use std::fmt;

use serde::{Deserialize, Serialize};

/// Fully qualified name of a bindable service component: the package that
/// hosts it plus the class implementing it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentName {
    /// Package (application) that hosts the service.
    pub package: String,
    /// Fully qualified class name of the service implementation.
    pub class: String,
}

impl ComponentName {
    #[must_use]
    pub fn new(package: impl Into<String>, class: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            class: class.into(),
        }
    }

    /// Returns the class name relative to the package when the class lives
    /// inside it (`.Rest`), otherwise the full class name.
    #[must_use]
    pub fn short_class_name(&self) -> &str {
        match self.class.strip_prefix(self.package.as_str()) {
            Some(rest) if rest.starts_with('.') && rest.len() > 1 => rest,
            _ => &self.class,
        }
    }

    /// Flattens to `package/class`.
    #[must_use]
    pub fn flatten_to_string(&self) -> String {
        format!("{}/{}", self.package, self.class)
    }

    /// Flattens to `package/.Rest` when the class is inside the package,
    /// falling back to `package/class`.
    ///
    /// This is the form used to key service connections.
    #[must_use]
    pub fn flatten_to_short_string(&self) -> String {
        format!("{}/{}", self.package, self.short_class_name())
    }

    /// Parses either flattened form back into a component name.
    ///
    /// Returns `None` if there is no `/` separator or either side is empty.
    #[must_use]
    pub fn unflatten_from_string(s: &str) -> Option<Self> {
        let (package, class) = s.split_once('/')?;
        if package.is_empty() || class.is_empty() {
            return None;
        }
        let class = if class.starts_with('.') {
            format!("{package}{class}")
        } else {
            class.to_string()
        };
        Some(Self::new(package, class))
    }
}

impl fmt::Display for ComponentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.package, self.short_class_name())
    }
}
