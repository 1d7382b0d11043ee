// src/engine.rs
//
// The conversion engine. Decodes an upload (HEIC through its own decoder
// chain), optionally resizes it, then encodes at a fixed quality or searches
// for a quality that meets a target file size.
//
// This file is a facade over the modules in engine/

// =============================================================================
// SECURITY LIMITS
// =============================================================================

/// Maximum allowed image dimension (width or height).
/// Images larger than 32768x32768 are rejected to prevent decompression bombs.
pub const MAX_DIMENSION: u32 = 32768;

/// Maximum allowed total pixels (width * height): 16383 x 16383.
pub const MAX_PIXELS: u64 = 268_402_689;

// =============================================================================
// MODULE DECOMPOSITION
// =============================================================================

mod common;
pub mod compress;
mod decoder;
mod encoder;
pub mod heic;
pub mod limits;
mod pipeline;
mod tasks;

pub use common::{run_with_panic_policy, EngineResult};
pub use compress::{
    compress_to_target, CodecProbe, EncodeAttempt, Probe, SearchConfig, SearchState,
    TargetSearch, Verdict,
};
pub use decoder::{check_dimensions, decode_image, detect_format, read_dimensions};
pub use encoder::{encode_image, encode_jpeg_baseline, QualitySettings};
pub use heic::{decode_heic, libheif_available, HeicDecoder};
pub use limits::{Deadline, Limits};
pub use pipeline::{calc_fit_inside, calc_scaled_dimensions, resize_to_fit, scale_image, ResizeError};
pub use tasks::{convert, fixed_encode_quality, ConvertTask, Stage, StageTracker};
