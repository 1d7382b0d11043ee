use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use image::{DynamicImage, RgbImage};
use imgconv::engine::{
    compress_to_target, encode_image, EncodeAttempt, SearchConfig, TargetSearch,
};
use imgconv::OutputFormat;
use std::hint::black_box;

fn photo_like(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        let n = x.wrapping_mul(73_856_093) ^ y.wrapping_mul(19_349_663);
        image::Rgb([
            ((x * 255 / width) as u8).wrapping_add((n & 0x0F) as u8),
            ((y * 255 / height) as u8).wrapping_add(((n >> 4) & 0x0F) as u8),
            (((x + y) * 127 / (width + height)) as u8).wrapping_add(((n >> 8) & 0x0F) as u8),
        ])
    }))
}

/// Pure driver cost against a synthetic size curve.
fn bench_search_driver(c: &mut Criterion) {
    let mut group = c.benchmark_group("search_driver");
    for target_kb in [50.0, 750.0, 4000.0] {
        let search = TargetSearch::new(target_kb, SearchConfig::default()).unwrap();
        group.bench_with_input(
            BenchmarkId::from_parameter(target_kb),
            &search,
            |b, search| {
                b.iter(|| {
                    search.run(|p| {
                        Ok(EncodeAttempt {
                            quality: p.quality,
                            format: OutputFormat::Jpg,
                            scale: p.scale,
                            bytes: Vec::new(),
                            size_kb: 12.0 * p.quality as f64 * p.scale * p.scale,
                        })
                    })
                })
            },
        );
    }
    group.finish();
}

fn bench_encoders(c: &mut Criterion) {
    let img = photo_like(512, 384);
    let mut group = c.benchmark_group("encode_512x384");
    group.sample_size(20);
    for format in [OutputFormat::Jpg, OutputFormat::Png, OutputFormat::WebP] {
        group.bench_with_input(BenchmarkId::new(format.as_str(), 75), &img, |b, img| {
            b.iter(|| encode_image(black_box(img), format, 75).unwrap())
        });
    }
    group.finish();
}

fn bench_target_size(c: &mut Criterion) {
    let img = photo_like(512, 384);
    let config = SearchConfig::default();
    let mut group = c.benchmark_group("compress_to_target_512x384");
    group.sample_size(10);
    for format in [OutputFormat::Jpg, OutputFormat::WebP] {
        group.bench_with_input(BenchmarkId::new(format.as_str(), 40), &img, |b, img| {
            b.iter(|| compress_to_target(black_box(img), format, 40.0, 80, &config, None))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_search_driver, bench_encoders, bench_target_size);
criterion_main!(benches);
