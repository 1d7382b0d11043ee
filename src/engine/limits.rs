// src/engine/limits.rs
//
// Resource limits and enforcement helpers: upload size, pixel area and wall-clock budget.

use crate::engine::{MAX_DIMENSION, MAX_PIXELS};
use crate::error::ConvertError;
use std::time::{Duration, Instant};

/// Default upload cap (50 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 50 * 1024 * 1024;
/// Default per-request wall-clock budget.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Limits {
    pub max_upload_bytes: u64,
    pub max_pixels: u64,
    pub max_dimension: u32,
    pub timeout_ms: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            max_pixels: MAX_PIXELS,
            max_dimension: MAX_DIMENSION,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

impl Limits {
    pub fn with_max_upload_bytes(mut self, bytes: u64) -> Self {
        self.max_upload_bytes = bytes;
        self
    }

    pub fn with_timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = ms;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn enforce_source_len(&self, len: usize) -> Result<(), ConvertError> {
        let len = len as u64;
        if len > self.max_upload_bytes {
            return Err(ConvertError::file_too_large(len, self.max_upload_bytes));
        }
        Ok(())
    }

    pub fn enforce_pixels(&self, width: u32, height: u32) -> Result<(), ConvertError> {
        if width > self.max_dimension || height > self.max_dimension {
            return Err(ConvertError::dimension_exceeds_limit(
                width.max(height),
                self.max_dimension,
            ));
        }
        let pixels = width as u64 * height as u64;
        if pixels > self.max_pixels {
            return Err(ConvertError::pixel_count_exceeds_limit(pixels, self.max_pixels));
        }
        Ok(())
    }

    pub fn enforce_timeout(
        &self,
        started_at: Instant,
        stage: &'static str,
    ) -> Result<(), ConvertError> {
        let elapsed_ms = started_at.elapsed().as_millis() as u64;
        if elapsed_ms > self.timeout_ms {
            return Err(ConvertError::timeout(stage, self.timeout_ms));
        }
        Ok(())
    }
}

/// A started wall-clock budget, checked between stages and search attempts.
#[derive(Clone, Copy, Debug)]
pub struct Deadline<'a> {
    limits: &'a Limits,
    started_at: Instant,
}

impl<'a> Deadline<'a> {
    pub fn start(limits: &'a Limits) -> Self {
        Self {
            limits,
            started_at: Instant::now(),
        }
    }

    pub fn check(&self, stage: &'static str) -> Result<(), ConvertError> {
        self.limits.enforce_timeout(self.started_at, stage)
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}
