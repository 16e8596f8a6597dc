//! Settings-backed [`ConfigStore`].

use std::collections::HashMap;

use kubeyard_core::ServiceConfig;

use crate::traits::ConfigStore;

/// Fixed key/value settings, usually the `[settings]` table of `kubeyard.toml`.
#[derive(Debug, Clone, Default)]
pub struct StaticConfigStore {
    values: HashMap<String, String>,
}

impl StaticConfigStore {
    pub fn new(values: HashMap<String, String>) -> Self {
        Self { values }
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.values.insert(key.to_string(), value.into());
        self
    }
}

impl From<&ServiceConfig> for StaticConfigStore {
    fn from(config: &ServiceConfig) -> Self {
        Self::new(config.settings.clone())
    }
}

impl ConfigStore for StaticConfigStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values
            .get(key)
            .filter(|v| !v.trim().is_empty())
            .cloned()
    }
}
