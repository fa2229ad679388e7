use criterion::{Criterion, black_box, criterion_group, criterion_main};

use vista_core::math::{Vec3, look_at_rh, mat4_to_cols_array_2d, perspective_rh};
use vista_core::pool::{FixedPool, PoolLifetime};

// ---------------------------------------------------------------------------
// Fixed pools
// ---------------------------------------------------------------------------

fn bench_pool_insert_sequential(c: &mut Criterion) {
    c.bench_function("fixed_pool_insert_10000", |b| {
        let mut pool = FixedPool::<[f32; 8]>::new("bench", 10_000, PoolLifetime::Persistent);
        b.iter(|| {
            for i in 0..10_000u32 {
                let _ = pool.insert(black_box(i), [i as f32; 8]);
            }
            black_box(pool.take_dirty());
        });
    });
}

fn bench_pool_push_and_clear(c: &mut Criterion) {
    c.bench_function("fixed_pool_push_clear_1000", |b| {
        let mut pool = FixedPool::<[f32; 8]>::new("bench", 10_000, PoolLifetime::PerFrame);
        b.iter(|| {
            for i in 0..1_000u32 {
                let _ = pool.push(black_box([i as f32; 8]));
            }
            pool.clear();
        });
    });
}

// ---------------------------------------------------------------------------
// Camera math
// ---------------------------------------------------------------------------

fn bench_view_matrices(c: &mut Criterion) {
    c.bench_function("view_projection_cols", |b| {
        b.iter(|| {
            let proj = perspective_rh(black_box(1.0), 1.0, 0.1, 100.0);
            let view = look_at_rh(&Vec3::new(0.0, 1.0, 5.0), &Vec3::zeros(), &Vec3::y());
            black_box((mat4_to_cols_array_2d(&proj), mat4_to_cols_array_2d(&view)))
        });
    });
}

criterion_group!(
    benches,
    bench_pool_insert_sequential,
    bench_pool_push_and_clear,
    bench_view_matrices,
);
criterion_main!(benches);
