//! Graphics instance.
//!
//! The [`GraphicsInstance`] is the top-level entry point for the graphics system.
//! It owns the backend, enumerates adapters and creates [`GraphicsDevice`]s with
//! the configured graphics, compute and transfer queues.

use std::sync::{Arc, RwLock, Weak};

use serde::Deserialize;

use crate::backend::{self, GpuBackend};
use crate::config::QueueConfig;
use crate::device::GraphicsDevice;
use crate::error::GraphicsError;
use crate::queue::{self, QueueFamilyInfo};

/// Information about a graphics adapter.
#[derive(Debug, Clone)]
pub struct AdapterInfo {
    /// Adapter name.
    pub name: String,
    /// Adapter vendor.
    pub vendor: String,
    /// Device type (discrete, integrated, etc.).
    pub device_type: AdapterType,
}

/// Type of graphics adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdapterType {
    /// Discrete GPU (dedicated graphics card).
    Discrete,
    /// Integrated GPU (shared with CPU).
    Integrated,
    /// Software renderer.
    Software,
    /// Unknown adapter type.
    Unknown,
}

/// Which backend the instance should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// Vulkan when compiled in and available, dummy otherwise.
    #[default]
    Auto,
    /// In-memory software backend.
    Dummy,
    /// Native Vulkan.
    Vulkan,
}

/// Parameters for creating a [`GraphicsInstance`].
#[derive(Debug, Clone, Default)]
pub struct InstanceParameters {
    /// Backend selection.
    pub backend: BackendType,
    /// Enable API validation layers where the backend has them.
    pub validation: bool,
}

impl InstanceParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backend(mut self, backend: BackendType) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }
}

/// The graphics instance manages devices and adapters.
///
/// This is the top-level entry point for the graphics system. Create an instance
/// to enumerate available adapters and create devices.
///
/// # Thread Safety
///
/// `GraphicsInstance` is `Send + Sync` and can be safely shared across threads.
///
/// # Example
///
/// ```ignore
/// let instance = GraphicsInstance::new(InstanceParameters::new())?;
/// let device = instance.create_device(0, &QueueConfig::default())?;
/// ```
pub struct GraphicsInstance {
    /// Weak self-reference for creating devices.
    self_ref: RwLock<Weak<GraphicsInstance>>,
    /// Devices created by this instance. Lost devices drop out once released.
    devices: RwLock<Vec<Weak<GraphicsDevice>>>,
    /// GPU backend for this instance.
    backend: Arc<dyn GpuBackend>,
}

impl GraphicsInstance {
    /// Create a new graphics instance.
    ///
    /// # Errors
    ///
    /// Returns an error if the requested backend cannot be initialized.
    pub fn new(params: InstanceParameters) -> Result<Arc<Self>, GraphicsError> {
        log::info!("Creating GraphicsInstance");
        let backend = backend::create_backend(&params)?;
        Ok(Self::with_backend(backend))
    }

    /// Create an instance around an existing backend.
    pub fn with_backend(backend: Arc<dyn GpuBackend>) -> Arc<Self> {
        log::info!("Using GPU backend: {}", backend.name());

        let instance = Arc::new(Self {
            self_ref: RwLock::new(Weak::new()),
            devices: RwLock::new(Vec::new()),
            backend,
        });

        // Store self-reference
        if let Ok(mut self_ref) = instance.self_ref.write() {
            *self_ref = Arc::downgrade(&instance);
        }

        instance
    }

    /// Get the GPU backend.
    pub fn backend(&self) -> &Arc<dyn GpuBackend> {
        &self.backend
    }

    /// Get the strong self-reference.
    fn arc_self(&self) -> Option<Arc<GraphicsInstance>> {
        self.self_ref.read().ok().and_then(|r| r.upgrade())
    }

    /// Enumerate available graphics adapters.
    pub fn enumerate_adapters(&self) -> Vec<AdapterInfo> {
        self.backend.enumerate_adapters()
    }

    /// Queue families of adapter `adapter_index`.
    pub fn queue_families(
        &self,
        adapter_index: usize,
    ) -> Result<Vec<QueueFamilyInfo>, GraphicsError> {
        self.backend.queue_families(adapter_index)
    }

    /// Create a graphics device with the configured queues.
    ///
    /// # Arguments
    ///
    /// * `adapter_index` - Index of the adapter to use (from `enumerate_adapters`)
    /// * `queues` - Queue count and priority per kind
    ///
    /// # Errors
    ///
    /// Returns [`GraphicsError::InvalidParameter`] for an unknown adapter and
    /// [`GraphicsError::DeviceInit`] when the queues cannot be provided or the
    /// backend fails to create the device.
    pub fn create_device(
        &self,
        adapter_index: usize,
        queues: &QueueConfig,
    ) -> Result<Arc<GraphicsDevice>, GraphicsError> {
        let adapters = self.enumerate_adapters();
        let adapter = adapters.get(adapter_index).ok_or_else(|| {
            GraphicsError::InvalidParameter(format!(
                "adapter index {adapter_index} out of range ({})",
                adapters.len()
            ))
        })?;
        log::info!("Creating device on adapter: {}", adapter.name);

        let families = self.backend.queue_families(adapter_index)?;
        let plan = queue::plan_queues(&families, queues)?;
        let raw = self
            .backend
            .create_device(adapter_index, &plan.requests)
            .map_err(|e| match e {
                GraphicsError::DeviceInit(_) => e,
                other => GraphicsError::DeviceInit(other.to_string()),
            })?;

        let instance = self.arc_self().ok_or_else(|| {
            GraphicsError::ResourceCreation("instance has been dropped".to_string())
        })?;
        let device = Arc::new(GraphicsDevice::new(instance, raw, plan));

        // Track the device
        if let Ok(mut devices) = self.devices.write() {
            devices.retain(|d| d.strong_count() > 0);
            devices.push(Arc::downgrade(&device));
        }

        Ok(device)
    }

    /// Get all live devices created by this instance.
    pub fn devices(&self) -> Vec<Arc<GraphicsDevice>> {
        self.devices
            .read()
            .map(|d| d.iter().filter_map(Weak::upgrade).collect())
            .unwrap_or_default()
    }

    /// Get the number of live devices created by this instance.
    pub fn device_count(&self) -> usize {
        self.devices
            .read()
            .map(|d| d.iter().filter(|d| d.strong_count() > 0).count())
            .unwrap_or(0)
    }
}

impl std::fmt::Debug for GraphicsInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphicsInstance")
            .field("backend", &self.backend.name())
            .field("device_count", &self.device_count())
            .finish()
    }
}

// Ensure GraphicsInstance is Send + Sync
static_assertions::assert_impl_all!(GraphicsInstance: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::DummyBackend;
    use crate::config::QueueSettings;
    use crate::queue::{QueueCapabilities, QueueKind};

    fn dummy_instance() -> Arc<GraphicsInstance> {
        GraphicsInstance::new(InstanceParameters::new().with_backend(BackendType::Dummy)).unwrap()
    }

    #[test]
    fn test_instance_creation() {
        let instance = dummy_instance();
        assert_eq!(instance.device_count(), 0);
        assert_eq!(instance.backend().name(), "Dummy");
    }

    #[test]
    fn test_enumerate_adapters() {
        let instance = dummy_instance();
        let adapters = instance.enumerate_adapters();
        assert_eq!(adapters.len(), 1);
        assert_eq!(adapters[0].device_type, AdapterType::Software);
    }

    #[test]
    fn test_create_device() {
        let instance = dummy_instance();
        let device = instance.create_device(0, &QueueConfig::default()).unwrap();
        assert_eq!(device.name(), "Dummy Adapter");
        assert_eq!(instance.device_count(), 1);
        assert!(Arc::ptr_eq(device.instance(), &instance));
    }

    #[test]
    fn test_dropped_devices_are_not_counted() {
        let instance = dummy_instance();
        let device = instance.create_device(0, &QueueConfig::default()).unwrap();
        drop(device);
        assert_eq!(instance.device_count(), 0);
    }

    #[test]
    fn test_invalid_adapter_index() {
        let instance = dummy_instance();
        let result = instance.create_device(999, &QueueConfig::default());
        assert!(matches!(result, Err(GraphicsError::InvalidParameter(_))));
    }

    #[test]
    fn test_single_family_fallback() {
        let backend = DummyBackend::with_queue_families(vec![QueueFamilyInfo::new(
            0,
            QueueCapabilities::all(),
            4,
        )]);
        let instance = GraphicsInstance::with_backend(Arc::new(backend));
        let device = instance.create_device(0, &QueueConfig::default()).unwrap();
        for kind in QueueKind::ALL {
            assert_eq!(device.queue(kind).family_index(), 0);
        }
        assert_eq!(device.queue(QueueKind::Transfer).queue_index(), 2);
    }

    #[test]
    fn test_not_enough_queues_fails() {
        let backend = DummyBackend::with_queue_families(vec![QueueFamilyInfo::new(
            0,
            QueueCapabilities::all(),
            2,
        )]);
        let instance = GraphicsInstance::with_backend(Arc::new(backend));
        let result = instance.create_device(0, &QueueConfig::default());
        assert!(matches!(result, Err(GraphicsError::DeviceInit(_))));
    }

    #[test]
    fn test_queue_counts_and_priorities() {
        let instance = dummy_instance();
        let config = QueueConfig {
            graphics: QueueSettings::new(2, 1.0),
            compute: QueueSettings::new(1, 0.5),
            transfer: QueueSettings::new(1, 0.25),
        };
        let device = instance.create_device(0, &config).unwrap();
        assert_eq!(device.queues(QueueKind::Graphics).len(), 2);
        assert_eq!(device.queue(QueueKind::Compute).priority(), 0.5);
        assert_eq!(device.queue(QueueKind::Transfer).priority(), 0.25);
    }

    #[test]
    fn test_backend_type_deserialize() {
        #[derive(Deserialize)]
        struct Wrapper {
            backend: BackendType,
        }
        let parsed: Wrapper = toml::from_str("backend = \"vulkan\"").unwrap();
        assert_eq!(parsed.backend, BackendType::Vulkan);
    }
}
