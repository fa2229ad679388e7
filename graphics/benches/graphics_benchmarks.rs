use std::time::Duration;

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use vista_core::math::Vec3;
use vista_graphics::{
    BackendType, BatchAllocator, BatchRenderer, DrawCommand, GraphicsInstance,
    InstanceParameters, LightProperties, MaterialProperties, PushConstantIndexer, QueueConfig,
    RendererConfig, ResourceBinder, ViewInfo,
};

fn views(count: usize) -> Vec<ViewInfo> {
    (0..count)
        .map(|i| ViewInfo::look_at(Vec3::new(i as f32, 1.0, 5.0), Vec3::zeros(), 0.8, 1.0))
        .collect()
}

// ---------------------------------------------------------------------------
// Push constants
// ---------------------------------------------------------------------------

fn bench_push_constant_roundtrip(c: &mut Criterion) {
    let indexer = PushConstantIndexer::new(64);

    c.bench_function("push_constant_encode_decode_4_slots", |b| {
        b.iter(|| {
            for slot in 0..4 {
                for view_slot in 0..64 {
                    let push = indexer.encode(black_box(slot), black_box(view_slot));
                    black_box(indexer.decode(push));
                }
            }
        });
    });
}

// ---------------------------------------------------------------------------
// Batch allocation
// ---------------------------------------------------------------------------

fn bench_batch_allocate(c: &mut Criterion) {
    let views = views(1000);

    c.bench_function("batch_allocate_1000_views", |b| {
        b.iter(|| {
            let mut allocator = BatchAllocator::new(64);
            black_box(allocator.allocate(&views));
            black_box(allocator.take_closed());
        });
    });
}

// ---------------------------------------------------------------------------
// Resource binder
// ---------------------------------------------------------------------------

fn bench_binder_upload(c: &mut Criterion) {
    let instance =
        GraphicsInstance::new(InstanceParameters::new().with_backend(BackendType::Dummy)).unwrap();
    let device = instance.create_device(0, &QueueConfig::default()).unwrap();
    let mut binder = ResourceBinder::new(256, 256);
    binder.bind_device(&device).unwrap();

    c.bench_function("binder_register_and_take_uploads_256", |b| {
        b.iter(|| {
            for i in 0..256 {
                binder
                    .register_material(i, MaterialProperties::new([1.0, 0.5, 0.0, 1.0]))
                    .unwrap();
                binder
                    .register_light(i, LightProperties::new(Vec3::zeros(), Vec3::x()))
                    .unwrap();
            }
            for upload in binder.take_uploads() {
                black_box(binder.upload_bytes(&upload));
            }
        });
    });
}

// ---------------------------------------------------------------------------
// Dummy renderer end to end
// ---------------------------------------------------------------------------

fn bench_dummy_submit_64_views(c: &mut Criterion) {
    let config = RendererConfig::default()
        .with_backend(BackendType::Dummy)
        .with_view_extent(8, 8)
        .with_retrieval_timeout(Duration::from_secs(5));
    let mut renderer = BatchRenderer::new(config).unwrap();
    renderer
        .register_material(0, MaterialProperties::new([1.0, 0.5, 0.0, 1.0]))
        .unwrap();
    renderer
        .push_light(LightProperties::new(Vec3::zeros(), Vec3::new(1.0, 1.0, 1.0)))
        .unwrap();
    renderer.set_draws(vec![DrawCommand::new(3, 0)]);
    let views = views(64);

    c.bench_function("dummy_renderer_submit_and_wait_64_views", |b| {
        b.iter(|| {
            let futures = renderer.submit_views(&views).unwrap();
            for future in futures {
                black_box(renderer.wait_for_batch(future.id()).unwrap());
            }
        });
    });
}

criterion_group!(
    benches,
    bench_push_constant_roundtrip,
    bench_batch_allocate,
    bench_binder_upload,
    bench_dummy_submit_64_views,
);
criterion_main!(benches);
