use std::collections::HashMap;

use anyhow::{anyhow, Result};

use crate::DeviceId;

use super::backend::DetectorBackend;
use super::backends::StubBackend;

/// Builds one backend instance bound to a device.
pub type BackendFactory = Box<dyn Fn(DeviceId) -> Result<Box<dyn DetectorBackend>> + Send + Sync>;

/// Registry of named detector backend factories.
///
/// The worker pool calls `create` once per worker, so every worker owns its own
/// backend instance.
pub struct BackendRegistry {
    factories: HashMap<String, BackendFactory>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with the built-in backends (`stub`).
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("stub", |_device| {
            Ok(Box::new(StubBackend::new()) as Box<dyn DetectorBackend>)
        });
        registry
    }

    /// Register a factory under `name`, replacing any previous one.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(DeviceId) -> Result<Box<dyn DetectorBackend>> + Send + Sync + 'static,
    {
        if self
            .factories
            .insert(name.to_string(), Box::new(factory))
            .is_some()
        {
            log::warn!("detector backend '{}' re-registered", name);
        }
    }

    /// Build and warm up a backend instance for `device`.
    pub fn create(&self, name: &str, device: DeviceId) -> Result<Box<dyn DetectorBackend>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| anyhow!("backend '{}' not registered", name))?;
        let mut backend = factory(device)?;
        backend.warm_up()?;
        Ok(backend)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// List registered backends, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;

    #[test]
    fn builtin_registry_creates_stub() {
        let registry = BackendRegistry::with_builtin();
        assert_eq!(registry.list(), vec!["stub".to_string()]);
        let backend = registry.create("stub", DeviceId(0)).unwrap();
        assert_eq!(backend.name(), "stub");
    }

    #[test]
    fn unknown_backend_is_an_error() {
        let registry = BackendRegistry::with_builtin();
        let err = registry.create("yolo", DeviceId(0)).err().unwrap();
        assert!(err.to_string().contains("not registered"));
    }

    #[test]
    fn factory_errors_propagate() {
        let mut registry = BackendRegistry::new();
        registry.register("flaky", |device| {
            if device.0 > 0 {
                bail!("no such device {}", device);
            }
            Ok(Box::new(StubBackend::new()) as Box<dyn DetectorBackend>)
        });
        assert!(registry.create("flaky", DeviceId(0)).is_ok());
        let err = registry.create("flaky", DeviceId(1)).err().unwrap();
        assert!(err.to_string().contains("gpu1"));
    }
}
