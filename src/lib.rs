// lib.rs
//
// imgconv: image conversion with target-file-size compression
//
// Design goals:
// - JPEG / PNG / WebP output from any common raster input, HEIC included
// - Hit a requested file size within a bounded number of encodes
// - One blocking worker per request, no shared mutable state between requests
// - Same HTTP contract whether called from the server or the batch client

// Memory allocator optimization - jemalloc for better performance
// Note: jemalloc is not supported on Windows/MSVC, so we exclude it on that platform
#[cfg(all(feature = "jemalloc", not(target_env = "msvc")))]
#[global_allocator]
static ALLOC: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

pub mod client;
pub mod codecs;
pub mod config;
pub mod engine;
pub mod error;
pub mod ops;
pub mod server;

pub use error::{ConvertError, ErrorCategory};
pub use ops::{ConversionRequest, ConversionResult, OutputFormat, ResizeBox};

use engine::read_dimensions;

/// Header-only image metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InspectMetadata {
    pub width: u32,
    pub height: u32,
    pub format: Option<String>,
}

/// Read dimensions and format from the header WITHOUT decoding pixels.
pub fn inspect_header_from_bytes(data: &[u8]) -> Result<InspectMetadata, ConvertError> {
    let (width, height) = read_dimensions(data)
        .ok_or_else(|| ConvertError::decode_failed("failed to read image header"))?;
    let format = engine::detect_format(data).map(|f| format!("{f:?}").to_lowercase());
    Ok(InspectMetadata {
        width,
        height,
        format,
    })
}

/// Library version
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Input types accepted at the upload boundary
pub fn supported_input_formats() -> &'static [&'static str] {
    &["jpeg", "jpg", "png", "webp", "heic", "heif", "tiff", "tif", "gif", "bmp"]
}

/// Output format tokens accepted by `format`
pub fn supported_output_formats() -> &'static [&'static str] {
    &["jpg", "jpeg", "png", "webp"]
}
