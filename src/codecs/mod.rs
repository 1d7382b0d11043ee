// src/codecs/mod.rs
//
// Codec-specific safe abstractions for FFI operations.

#[cfg(feature = "heif")]
pub mod heif;
