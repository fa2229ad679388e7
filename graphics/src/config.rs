//! Renderer configuration.
//!
//! [`RendererConfig`] can be built in code with the `with_*` setters or loaded
//! from TOML. Every field is optional in TOML; missing fields take the
//! defaults below.
//!
//! ```toml
//! backend = "dummy"
//! images_per_fb = 16
//! view_extent = { width = 128, height = 128 }
//! max_lights = 256
//!
//! [queues.compute]
//! count = 2
//! priority = 0.5
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::GraphicsError;
use crate::instance::BackendType;
use crate::queue::QueueKind;
use crate::types::{AtlasLayout, Extent2d, ViewInfo};

/// Graphics queues requested per device.
pub const NUM_DESIRED_GFX_QUEUES: u32 = 1;
/// Compute queues requested per device.
pub const NUM_DESIRED_COMPUTE_QUEUES: u32 = 1;
/// Transfer queues requested per device.
pub const NUM_DESIRED_TRANSFER_QUEUES: u32 = 1;
/// Priority of graphics queues.
pub const GFX_PRIORITY: f32 = 1.0;
/// Priority of compute queues.
pub const COMPUTE_PRIORITY: f32 = 1.0;
/// Priority of transfer queues.
pub const TRANSFER_PRIORITY: f32 = 1.0;
/// Maximum number of views sharing one framebuffer atlas.
pub const NUM_IMAGES_PER_FB: u32 = 64;
/// Ceiling of the material pool.
pub const MAX_MATERIALS: u32 = 10_000;
/// Ceiling of the light pool.
pub const MAX_LIGHTS: u32 = 10_000;

const DEFAULT_VIEW_EXTENT: Extent2d = Extent2d::new(64, 64);
const DEFAULT_MAX_BATCHES_IN_FLIGHT: u32 = 4;
const DEFAULT_STAGING_SIZE: u64 = 4 * 1024 * 1024;
const DEFAULT_RETRIEVAL_TIMEOUT_MS: u64 = 10_000;

/// Count and priority of the queues of one kind.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    pub count: u32,
    pub priority: f32,
}

impl QueueSettings {
    pub const fn new(count: u32, priority: f32) -> Self {
        Self { count, priority }
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self::new(1, 1.0)
    }
}

/// Queue settings for every kind.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub graphics: QueueSettings,
    pub compute: QueueSettings,
    pub transfer: QueueSettings,
}

impl QueueConfig {
    pub fn get(&self, kind: QueueKind) -> QueueSettings {
        match kind {
            QueueKind::Graphics => self.graphics,
            QueueKind::Compute => self.compute,
            QueueKind::Transfer => self.transfer,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            graphics: QueueSettings::new(NUM_DESIRED_GFX_QUEUES, GFX_PRIORITY),
            compute: QueueSettings::new(NUM_DESIRED_COMPUTE_QUEUES, COMPUTE_PRIORITY),
            transfer: QueueSettings::new(NUM_DESIRED_TRANSFER_QUEUES, TRANSFER_PRIORITY),
        }
    }
}

/// Configuration of a [`BatchRenderer`](crate::BatchRenderer).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Backend to create the instance with.
    pub backend: BackendType,
    /// Enable API validation layers where the backend has them.
    pub validation: bool,
    /// Adapter to create the device on.
    pub adapter_index: usize,
    pub queues: QueueConfig,
    /// Views per framebuffer atlas.
    pub images_per_fb: u32,
    /// Size of each rendered view.
    pub view_extent: Extent2d,
    pub max_materials: u32,
    pub max_lights: u32,
    /// Batches that may be on the device at once.
    pub max_batches_in_flight: u32,
    /// Size of the host-visible upload ring in bytes.
    pub staging_size: u64,
    /// Default timeout of blocking waits.
    pub retrieval_timeout_ms: u64,
    /// Atlas clear color, linear RGBA.
    pub clear_color: [f32; 4],
    /// Workgroup counts of the optional resolve dispatch on the compute queue.
    pub compute_dispatch: Option<[u32; 3]>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            backend: BackendType::default(),
            validation: false,
            adapter_index: 0,
            queues: QueueConfig::default(),
            images_per_fb: NUM_IMAGES_PER_FB,
            view_extent: DEFAULT_VIEW_EXTENT,
            max_materials: MAX_MATERIALS,
            max_lights: MAX_LIGHTS,
            max_batches_in_flight: DEFAULT_MAX_BATCHES_IN_FLIGHT,
            staging_size: DEFAULT_STAGING_SIZE,
            retrieval_timeout_ms: DEFAULT_RETRIEVAL_TIMEOUT_MS,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            compute_dispatch: None,
        }
    }
}

impl RendererConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`GraphicsError::Config`] if the text does not parse or the
    /// result fails [`validate`](Self::validate).
    pub fn from_toml_str(text: &str) -> Result<Self, GraphicsError> {
        let config: Self = toml::from_str(text)
            .map_err(|e| GraphicsError::Config(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`GraphicsError::Config`] if the file cannot be read or parsed,
    /// or fails validation.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, GraphicsError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            GraphicsError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        let config = Self::from_toml_str(&text)?;
        log::info!("Loaded renderer config from {}", path.display());
        Ok(config)
    }

    /// Check every field against its limits.
    ///
    /// # Errors
    ///
    /// Returns [`GraphicsError::Config`] naming the first offending field.
    pub fn validate(&self) -> Result<(), GraphicsError> {
        for kind in QueueKind::ALL {
            let settings = self.queues.get(kind);
            if settings.count == 0 {
                return Err(GraphicsError::Config(format!(
                    "queues.{kind}.count must be at least 1"
                )));
            }
            if !(0.0..=1.0).contains(&settings.priority) {
                return Err(GraphicsError::Config(format!(
                    "queues.{kind}.priority must be within [0, 1], got {}",
                    settings.priority
                )));
            }
        }

        check_range("images_per_fb", self.images_per_fb, NUM_IMAGES_PER_FB)?;
        check_range("max_materials", self.max_materials, MAX_MATERIALS)?;
        check_range("max_lights", self.max_lights, MAX_LIGHTS)?;

        if self.view_extent.width == 0 || self.view_extent.height == 0 {
            return Err(GraphicsError::Config(
                "view_extent must be non-zero".to_string(),
            ));
        }
        if self.atlas_layout().checked_extent().is_none() {
            let layout = self.atlas_layout();
            return Err(GraphicsError::Config(format!(
                "view_extent {}x{} overflows a {}x{} atlas",
                self.view_extent.width,
                self.view_extent.height,
                layout.columns(),
                layout.rows()
            )));
        }
        if self.max_batches_in_flight == 0 {
            return Err(GraphicsError::Config(
                "max_batches_in_flight must be at least 1".to_string(),
            ));
        }
        let batch_views = self.images_per_fb as u64 * ViewInfo::SIZE;
        if self.staging_size < batch_views {
            return Err(GraphicsError::Config(format!(
                "staging_size {} cannot hold the views of one batch ({batch_views} bytes)",
                self.staging_size
            )));
        }
        if self.retrieval_timeout_ms == 0 {
            return Err(GraphicsError::Config(
                "retrieval_timeout_ms must be non-zero".to_string(),
            ));
        }
        if let Some(groups) = self.compute_dispatch {
            if groups.contains(&0) {
                return Err(GraphicsError::Config(
                    "compute_dispatch workgroup counts must be non-zero".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Default timeout of blocking waits.
    pub fn retrieval_timeout(&self) -> Duration {
        Duration::from_millis(self.retrieval_timeout_ms)
    }

    /// Atlas layout implied by `images_per_fb` and `view_extent`.
    pub fn atlas_layout(&self) -> AtlasLayout {
        AtlasLayout::new(self.images_per_fb, self.view_extent)
    }

    pub fn with_backend(mut self, backend: BackendType) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    pub fn with_queues(mut self, queues: QueueConfig) -> Self {
        self.queues = queues;
        self
    }

    pub fn with_images_per_fb(mut self, images_per_fb: u32) -> Self {
        self.images_per_fb = images_per_fb;
        self
    }

    pub fn with_view_extent(mut self, width: u32, height: u32) -> Self {
        self.view_extent = Extent2d::new(width, height);
        self
    }

    pub fn with_max_materials(mut self, max_materials: u32) -> Self {
        self.max_materials = max_materials;
        self
    }

    pub fn with_max_lights(mut self, max_lights: u32) -> Self {
        self.max_lights = max_lights;
        self
    }

    pub fn with_max_batches_in_flight(mut self, count: u32) -> Self {
        self.max_batches_in_flight = count;
        self
    }

    pub fn with_staging_size(mut self, size: u64) -> Self {
        self.staging_size = size;
        self
    }

    pub fn with_retrieval_timeout(mut self, timeout: Duration) -> Self {
        self.retrieval_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_color = color;
        self
    }

    pub fn with_compute_dispatch(mut self, groups: Option<[u32; 3]>) -> Self {
        self.compute_dispatch = groups;
        self
    }
}

fn check_range(field: &str, value: u32, max: u32) -> Result<(), GraphicsError> {
    if value == 0 || value > max {
        return Err(GraphicsError::Config(format!(
            "{field} must be within 1..={max}, got {value}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_constants() {
        let config = RendererConfig::default();
        assert_eq!(config.images_per_fb, NUM_IMAGES_PER_FB);
        assert_eq!(config.max_materials, MAX_MATERIALS);
        assert_eq!(config.max_lights, MAX_LIGHTS);
        assert_eq!(config.queues.graphics, QueueSettings::new(1, 1.0));
        assert_eq!(config.queues.compute, QueueSettings::new(1, 1.0));
        assert_eq!(config.queues.transfer, QueueSettings::new(1, 1.0));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_partial() {
        let config = RendererConfig::from_toml_str(
            r#"
            backend = "dummy"
            images_per_fb = 16
            view_extent = { width = 128, height = 32 }

            [queues.compute]
            count = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.backend, BackendType::Dummy);
        assert_eq!(config.images_per_fb, 16);
        assert_eq!(config.view_extent, Extent2d::new(128, 32));
        assert_eq!(config.queues.compute, QueueSettings::new(2, 1.0));
        assert_eq!(config.max_lights, MAX_LIGHTS);
    }

    #[test]
    fn test_from_toml_rejects_limits() {
        let err = RendererConfig::from_toml_str("images_per_fb = 65").unwrap_err();
        assert!(matches!(err, GraphicsError::Config(_)));

        let err = RendererConfig::from_toml_str("max_lights = 10001").unwrap_err();
        assert!(matches!(err, GraphicsError::Config(_)));
    }

    #[test]
    fn test_from_toml_rejects_garbage() {
        let err = RendererConfig::from_toml_str("images_per_fb = \"many\"").unwrap_err();
        assert!(matches!(err, GraphicsError::Config(_)));
    }

    #[test]
    fn test_validate_staging_size() {
        let config = RendererConfig::default().with_staging_size(64);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_atlas_overflow() {
        let config = RendererConfig::default().with_view_extent(u32::MAX / 4, 64);
        assert!(matches!(config.validate(), Err(GraphicsError::Config(_))));
        assert!(RendererConfig::default().with_view_extent(1024, 64).validate().is_ok());
    }

    #[test]
    fn test_validate_queue_priority() {
        let mut queues = QueueConfig::default();
        queues.transfer.priority = 1.5;
        let config = RendererConfig::default().with_queues(queues);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let err = RendererConfig::load("/nonexistent/vista.toml").unwrap_err();
        assert!(matches!(err, GraphicsError::Config(_)));
    }
}
