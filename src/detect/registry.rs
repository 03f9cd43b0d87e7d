use std::collections::BTreeMap;

use anyhow::{anyhow, Context, Result};

use super::backend::DetectorBackend;
use super::backends::{CpuBackend, ReplayBackend};
use super::DetectorSettings;

/// Constructs a backend from detector settings.
pub type BackendFactory = fn(&DetectorSettings) -> Result<Box<dyn DetectorBackend>>;

/// Registry of detector backend factories.
///
/// Backends are chosen once, by name, from explicit configuration. The
/// pipeline never probes for alternatives while frames are flowing.
pub struct BackendRegistry {
    factories: BTreeMap<String, BackendFactory>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Registry with every backend compiled into this build.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("cpu", |settings| Ok(Box::new(CpuBackend::from_settings(settings))));
        registry.register("replay", |settings| {
            Ok(Box::new(ReplayBackend::from_settings(settings)?))
        });
        #[cfg(feature = "backend-tract")]
        registry.register("tract", |settings| {
            Ok(Box::new(super::backends::TractBackend::from_settings(
                settings,
            )?))
        });
        registry
    }

    /// Register a factory. A later registration under the same name wins.
    pub fn register(&mut self, name: &str, factory: BackendFactory) {
        self.factories.insert(name.to_string(), factory);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// List registered backends in name order.
    pub fn list(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    /// Build the backend registered under `name`.
    pub fn create(
        &self,
        name: &str,
        settings: &DetectorSettings,
    ) -> Result<Box<dyn DetectorBackend>> {
        let factory = self.factories.get(name).ok_or_else(|| {
            anyhow!(
                "detector backend '{}' not registered (available: {})",
                name,
                self.list().join(", ")
            )
        })?;
        factory(settings).with_context(|| format!("initialize detector backend '{}'", name))
    }

    /// Build and warm up the backend named in `settings`.
    pub fn select(&self, settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
        let mut backend = self.create(&settings.name, settings)?;
        backend
            .warm_up()
            .with_context(|| format!("warm up detector backend '{}'", settings.name))?;
        log::info!("detector backend: {}", backend.name());
        Ok(backend)
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}
