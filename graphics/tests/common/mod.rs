//! Shared helpers for renderer integration tests.
//!
//! Every test runs on the dummy backend, which interprets the recorded
//! command lists in software and lets tests hold completions back or lose
//! the device on demand.

#![allow(dead_code)]

use std::f32::consts::FRAC_PI_4;
use std::time::Duration;

use vista_core::math::Vec3;
use vista_graphics::backend::dummy::DummyDevice;
use vista_graphics::{
    BackendType, BatchRenderer, DrawCommand, LightProperties, MaterialProperties,
    RendererConfig, ViewInfo,
};

/// Route `log` output through the test harness.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Small views so the atlases stay cheap to shade in software.
pub fn config() -> RendererConfig {
    RendererConfig::default()
        .with_backend(BackendType::Dummy)
        .with_view_extent(2, 2)
        .with_retrieval_timeout(Duration::from_millis(500))
}

pub fn renderer() -> BatchRenderer {
    init_logging();
    BatchRenderer::new(config()).expect("Failed to create dummy renderer")
}

/// The renderer's device as the dummy backend's device.
pub fn dummy(renderer: &BatchRenderer) -> &DummyDevice {
    renderer
        .device()
        .raw()
        .as_any()
        .downcast_ref::<DummyDevice>()
        .expect("renderer is not on the dummy backend")
}

/// `count` distinct cameras on a line, all looking at the origin.
pub fn views(count: usize) -> Vec<ViewInfo> {
    (0..count)
        .map(|i| ViewInfo::look_at(Vec3::new(i as f32, 1.0, 5.0), Vec3::zeros(), FRAC_PI_4, 1.0))
        .collect()
}

/// Orange material under one white light.
pub const ORANGE_TEXEL: [u8; 4] = [255, 128, 0, 255];

/// Register one material and one white light, and draw a triangle with it.
pub fn simple_scene(renderer: &mut BatchRenderer) {
    renderer
        .register_material(0, MaterialProperties::new([1.0, 0.5, 0.0, 1.0]))
        .unwrap();
    renderer
        .push_light(LightProperties::new(Vec3::zeros(), Vec3::new(1.0, 1.0, 1.0)))
        .unwrap();
    renderer.set_draws(vec![DrawCommand::new(3, 0)]);
}
