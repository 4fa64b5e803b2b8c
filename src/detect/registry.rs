use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

use crate::detect::result::Detection;
use crate::frame::Frame;

use super::backend::DetectorBackend;
use super::backends::StubBackend;
use crate::config::PotholeConfig;

#[cfg(feature = "backend-tract")]
const MODEL_INPUT_SIDE: u32 = 640;

/// Handle to a registered backend that can be moved into a pipeline.
///
/// Backends are wrapped in `Mutex` because `DetectorBackend::detect` takes `&mut self`;
/// concurrent pipelines sharing one model serialise on the lock.
#[derive(Clone)]
pub struct SharedBackend {
    name: &'static str,
    inner: Arc<Mutex<dyn DetectorBackend>>,
}

impl DetectorBackend for SharedBackend {
    fn name(&self) -> &'static str {
        self.name
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| anyhow!("backend '{}' lock poisoned", self.name))?;
        guard.detect(frame)
    }

    fn warm_up(&mut self) -> Result<()> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| anyhow!("backend '{}' lock poisoned", self.name))?;
        guard.warm_up()
    }
}

/// Thread-safe registry of detector backends.
pub struct BackendRegistry {
    backends: HashMap<String, SharedBackend>,
    default_name: Option<String>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            backends: HashMap::new(),
            default_name: None,
        }
    }

    /// Register a backend. The first registered backend becomes the default.
    pub fn register<B: DetectorBackend + 'static>(&mut self, backend: B) {
        let name = backend.name();
        if self.default_name.is_none() {
            self.default_name = Some(name.to_string());
        }
        self.backends.insert(
            name.to_string(),
            SharedBackend {
                name,
                inner: Arc::new(Mutex::new(backend)),
            },
        );
    }

    /// Stub backend always; the ONNX backend when built in and a model is
    /// configured. The ONNX backend becomes the default when present.
    pub fn from_config(cfg: &PotholeConfig) -> Result<Self> {
        let mut registry = Self::new();
        registry.register(StubBackend::new());
        #[cfg(feature = "backend-tract")]
        {
            if let Some(path) = &cfg.model_path {
                let backend = super::TractBackend::new(path, MODEL_INPUT_SIDE, MODEL_INPUT_SIDE)?
                    .with_thresholds(
                        cfg.detector.confidence_threshold,
                        cfg.detector.nms_threshold,
                    );
                registry.register(backend);
                registry.set_default("tract")?;
            }
        }
        #[cfg(not(feature = "backend-tract"))]
        {
            if let Some(path) = &cfg.model_path {
                log::warn!(
                    "model {} ignored: built without backend-tract",
                    path.display()
                );
            }
        }
        Ok(registry)
    }

    /// Set default backend by name.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.backends.contains_key(name) {
            return Err(anyhow!("backend '{}' not registered", name));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    /// Get backend by name.
    pub fn get(&self, name: &str) -> Option<SharedBackend> {
        self.backends.get(name).cloned()
    }

    /// Get default backend.
    pub fn default_backend(&self) -> Option<SharedBackend> {
        self.default_name.as_ref().and_then(|name| self.get(name))
    }

    /// List registered backends, sorted by name.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.keys().cloned().collect();
        names.sort();
        names
    }

    /// Run detection with the default backend.
    pub fn detect(&self, frame: &Frame) -> Result<Vec<Detection>> {
        let mut backend = self
            .default_backend()
            .ok_or_else(|| anyhow!("no detector backend registered"))?;
        backend.detect(frame)
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EmptyBackend;

    impl DetectorBackend for EmptyBackend {
        fn name(&self) -> &'static str {
            "empty"
        }

        fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn first_registered_is_default() {
        let mut registry = BackendRegistry::new();
        assert!(registry.detect(&Frame::filled(32, 32, [0, 0, 0]).unwrap()).is_err());

        registry.register(StubBackend::new());
        registry.register(EmptyBackend);
        assert_eq!(registry.list(), vec!["empty", "stub"]);
        assert_eq!(registry.default_backend().unwrap().name(), "stub");

        registry.set_default("empty").unwrap();
        let frame = Frame::filled(64, 64, [10, 20, 30]).unwrap();
        assert!(registry.detect(&frame).unwrap().is_empty());
        assert!(registry.set_default("tract").is_err());
    }

    #[test]
    fn shared_handles_reach_same_backend() {
        let mut registry = BackendRegistry::new();
        registry.register(StubBackend::new());
        let mut a = registry.get("stub").unwrap();
        let mut b = registry.get("stub").unwrap();
        let frame = Frame::filled(128, 96, [1, 2, 3]).unwrap();
        assert_eq!(a.detect(&frame).unwrap(), b.detect(&frame).unwrap());
    }

    #[test]
    fn default_config_registers_stub() {
        let registry = BackendRegistry::from_config(&PotholeConfig::default()).unwrap();
        assert_eq!(registry.list(), vec!["stub"]);
        assert_eq!(registry.default_backend().unwrap().name(), "stub");
    }
}
