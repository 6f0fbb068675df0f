//! Capability default configuration.
//!
//! The configuration subsystem is an external collaborator; the engine only
//! sees a boolean default per capability path, readable synchronously at
//! resolution time.

use std::collections::HashMap;

use parking_lot::RwLock;

/// Source of configured default decisions, keyed by capability full path.
pub trait DefaultsSource: Send + Sync {
    /// Current configured default for a capability, if one is set.
    fn default_for(&self, path: &str) -> Option<bool>;
}

/// In-memory defaults, writable at runtime.
///
/// Backs tests and embedders that manage configuration themselves; a real
/// deployment wraps its config subsystem in [`DefaultsSource`] instead.
#[derive(Debug, Default)]
pub struct StaticDefaults {
    values: RwLock<HashMap<String, bool>>,
}

impl StaticDefaults {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the configured default for a capability path.
    pub fn set(&self, path: &str, value: bool) {
        self.values.write().insert(path.to_owned(), value);
    }

    /// Remove the configured default for a capability path.
    pub fn clear(&self, path: &str) {
        self.values.write().remove(path);
    }
}

impl DefaultsSource for StaticDefaults {
    fn default_for(&self, path: &str) -> Option<bool> {
        self.values.read().get(path).copied()
    }
}
