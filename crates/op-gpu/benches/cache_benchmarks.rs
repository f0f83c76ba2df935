//! Benchmarks for key derivation, shader generation and cache lookups

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use op_core::ThreadPool;
use op_gpu::shader::generate_depal_shader;
use op_gpu::{
    ClutId, ClutMode, DepalShaderCache, GePaletteFormat, PixelFormat, ResourceCache, ShaderId, ShaderLanguage,
    SoftwareDevice,
};
use std::sync::Arc;

fn bench_key_derivation(c: &mut Criterion) {
    let mut group = c.benchmark_group("key_derivation");

    group.bench_function("shader_id", |b| {
        let mut mode = 0u32;
        b.iter(|| {
            mode = mode.wrapping_add(0x0101);
            black_box(ShaderId::generate(black_box(mode), PixelFormat::Clut8))
        });
    });

    group.bench_function("clut_id", |b| {
        let mut hash = 0u32;
        b.iter(|| {
            hash = hash.wrapping_mul(0x9E37_79B9).wrapping_add(1);
            black_box(ClutId::new(GePaletteFormat::Abgr8888, black_box(hash)))
        });
    });

    group.finish();
}

fn bench_shader_generation(c: &mut Criterion) {
    let mut group = c.benchmark_group("depal_generation");
    let id = ShaderId::generate(ClutMode::new(GePaletteFormat::Abgr8888, 0, 0xFF, 0).raw(), PixelFormat::Rgba8888);

    for language in [ShaderLanguage::GlslEs300, ShaderLanguage::HlslD3d9, ShaderLanguage::HlslD3d11] {
        group.bench_with_input(BenchmarkId::new("generate", format!("{:?}", language)), &language, |b, &lang| {
            b.iter(|| black_box(generate_depal_shader(id, lang)));
        });
    }

    group.finish();
}

fn bench_cache_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_lookup");

    for size in [16u32, 256, 4096] {
        let mut cache: ResourceCache<ClutId, u32> = ResourceCache::new();
        for i in 0..size {
            cache.insert(ClutId::new(GePaletteFormat::Abgr5551, i), i);
        }
        group.bench_with_input(BenchmarkId::new("resource_cache_hit", size), &size, |b, &size| {
            let mut i = 0u32;
            b.iter(|| {
                i = (i + 7) % size;
                black_box(cache.get(&ClutId::new(GePaletteFormat::Abgr5551, i)))
            });
        });
    }

    group.bench_function("depal_shader_hit", |b| {
        let mut device = SoftwareDevice::new(Arc::new(ThreadPool::new(1)), 16, 16);
        let mut depal = DepalShaderCache::new(ShaderLanguage::GlslEs300);
        let mode = ClutMode::new(GePaletteFormat::Abgr8888, 0, 0xFF, 0).raw();
        let _ = depal.get_depalettize_shader(&mut device, mode, PixelFormat::Clut8);
        b.iter(|| black_box(depal.get_depalettize_shader(&mut device, mode, PixelFormat::Clut8).ok()));
    });

    group.bench_function("clut_texture_hit", |b| {
        let mut device = SoftwareDevice::new(Arc::new(ThreadPool::new(1)), 16, 16);
        let mut depal = DepalShaderCache::new(ShaderLanguage::GlslEs300);
        let clut = [0x5Au8; 1024];
        let _ = depal.get_clut_texture(&mut device, GePaletteFormat::Abgr8888, 42, &clut);
        b.iter(|| black_box(depal.get_clut_texture(&mut device, GePaletteFormat::Abgr8888, 42, &clut).ok()));
    });

    group.finish();
}

criterion_group!(benches, bench_key_derivation, bench_shader_generation, bench_cache_lookup);
criterion_main!(benches);
