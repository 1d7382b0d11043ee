#![no_main]

//! Fixed-quality and target-size encoding over arbitrary pixels.

use arbitrary::{Arbitrary, Unstructured};
use image::{DynamicImage, RgbaImage};
use imgconv::engine::{compress_to_target, encode_image, SearchConfig};
use imgconv::OutputFormat;
use libfuzzer_sys::fuzz_target;

#[derive(Arbitrary, Debug)]
struct EncodeSeed {
    format: u8,
    quality: u8,
    width: u8,
    height: u8,
    target_kb: u16,
}

fn build_image(data: &[u8], width: u8, height: u8) -> DynamicImage {
    // Max 64x64 so target-size runs stay cheap
    let w = (width as u32 % 64).max(1);
    let h = (height as u32 % 64).max(1);
    let buffer: Vec<u8> = (0..(w * h * 4) as usize)
        .map(|i| data.get(i % data.len().max(1)).copied().unwrap_or(128))
        .collect();

    match RgbaImage::from_raw(w, h, buffer) {
        Some(rgba) => DynamicImage::ImageRgba8(rgba),
        None => DynamicImage::new_rgba8(1, 1),
    }
}

fuzz_target!(|data: &[u8]| {
    if data.len() < 8 {
        return;
    }

    let mut unstructured = Unstructured::new(data);
    let seed: EncodeSeed = match EncodeSeed::arbitrary(&mut unstructured) {
        Ok(s) => s,
        Err(_) => return,
    };

    let img = build_image(data, seed.width, seed.height);
    let format = match seed.format % 3 {
        0 => OutputFormat::Jpg,
        1 => OutputFormat::Png,
        _ => OutputFormat::WebP,
    };

    // Only panics matter here, not encode errors
    if seed.target_kb == 0 {
        let _ = encode_image(&img, format, seed.quality);
    } else {
        let config = SearchConfig::default().with_max_attempts(4);
        let target_kb = seed.target_kb as f64 / 64.0;
        let _ = compress_to_target(&img, format, target_kb, seed.quality.max(1), &config, None);
    }
});
