// src/engine/tasks.rs
//
// Conversion task: validate -> decode -> resize -> encode, one request at a time.
// Runs on a blocking worker; the transport (HTTP, in-process client) wraps it.

use crate::engine::compress::{compress_to_target, SearchConfig};
use crate::engine::decoder::{decode_image, read_dimensions};
use crate::engine::encoder::encode_image;
use crate::engine::heic::decode_heic;
use crate::engine::limits::{Deadline, Limits};
use crate::engine::pipeline::resize_to_fit;
use crate::error::ConvertError;
use crate::ops::{ConversionRequest, ConversionResult, EncodeStrategy, InputKind};
use image::DynamicImage;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

/// Fixed-quality requests encode at this fraction of the requested quality.
const FIXED_QUALITY_FACTOR: f64 = 0.7;

/// Where a request is in its lifecycle. `Errored` absorbs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Received,
    Validated,
    Decoded,
    Resized,
    Encoded,
    Responded,
    Errored,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Received => "received",
            Stage::Validated => "validated",
            Stage::Decoded => "decoded",
            Stage::Resized => "resized",
            Stage::Encoded => "encoded",
            Stage::Responded => "responded",
            Stage::Errored => "errored",
        }
    }

    /// The stage that normally follows this one.
    pub fn next(&self) -> Option<Stage> {
        match self {
            Stage::Received => Some(Stage::Validated),
            Stage::Validated => Some(Stage::Decoded),
            Stage::Decoded => Some(Stage::Resized),
            Stage::Resized => Some(Stage::Encoded),
            Stage::Encoded => Some(Stage::Responded),
            Stage::Responded | Stage::Errored => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stage tracker with per-stage timings.
#[derive(Debug)]
pub struct StageTracker {
    current: Stage,
    failed_at: Option<Stage>,
    started_at: Instant,
    mark: Instant,
    timings: Vec<(Stage, Duration)>,
}

impl StageTracker {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            current: Stage::Received,
            failed_at: None,
            started_at: now,
            mark: now,
            timings: Vec::with_capacity(5),
        }
    }

    pub fn current(&self) -> Stage {
        self.current
    }

    /// Stage that was active when the request failed.
    pub fn failed_at(&self) -> Option<Stage> {
        self.failed_at
    }

    pub fn timings(&self) -> &[(Stage, Duration)] {
        &self.timings
    }

    pub fn total(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Move to the next stage. Out-of-order transitions are ignored.
    pub fn advance(&mut self) {
        let Some(next) = self.current.next() else {
            return;
        };
        let now = Instant::now();
        let spent = now - self.mark;
        self.mark = now;
        self.timings.push((next, spent));
        debug!(from = %self.current, to = %next, elapsed_ms = spent.as_millis() as u64, "stage");
        self.current = next;
    }

    pub fn fail(&mut self, err: &ConvertError) {
        if self.current == Stage::Errored {
            return;
        }
        self.failed_at = Some(self.current);
        warn!(stage = %self.current, category = err.category().as_str(), error = %err, "conversion failed");
        self.current = Stage::Errored;
    }
}

impl Default for StageTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed-quality path: `round(quality * 0.7)`, clamped to 1-100.
pub fn fixed_encode_quality(quality: u8) -> u8 {
    ((quality as f64 * FIXED_QUALITY_FACTOR).round() as i64).clamp(1, 100) as u8
}

/// A single conversion job bound to its limits and search configuration.
pub struct ConvertTask<'a> {
    pub request_id: Uuid,
    pub request: ConversionRequest,
    pub limits: &'a Limits,
    pub search: &'a SearchConfig,
}

impl<'a> ConvertTask<'a> {
    pub fn new(request: ConversionRequest, limits: &'a Limits, search: &'a SearchConfig) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            request,
            limits,
            search,
        }
    }

    pub fn with_request_id(mut self, request_id: Uuid) -> Self {
        self.request_id = request_id;
        self
    }

    /// Run the whole pipeline inside a request span.
    pub fn run(self) -> Result<ConversionResult, ConvertError> {
        let req = &self.request;
        let span = info_span!(
            "convert",
            request_id = %self.request_id,
            filename = %req.source_filename,
            format = %req.output_format,
            quality = req.quality,
            target_kb = req.target_size_kb.unwrap_or(0.0),
        );
        let _enter = span.enter();

        let mut tracker = StageTracker::new();
        match self.process(&mut tracker) {
            Ok(result) => {
                tracker.advance();
                info!(
                    bytes_in = self.request.image_bytes.len(),
                    bytes_out = result.bytes.len(),
                    total_ms = tracker.total().as_millis() as u64,
                    "conversion complete"
                );
                Ok(result)
            }
            Err(err) => {
                tracker.fail(&err);
                Err(err)
            }
        }
    }

    fn process(&self, tracker: &mut StageTracker) -> Result<ConversionResult, ConvertError> {
        let deadline = Deadline::start(self.limits);
        let req = &self.request;

        // Received -> Validated
        if req.image_bytes.is_empty() {
            return Err(ConvertError::missing_input());
        }
        self.limits.enforce_source_len(req.image_bytes.len())?;
        tracker.advance();

        // Validated -> Decoded
        let img = self.decode()?;
        deadline.check("decode")?;
        tracker.advance();

        // Decoded -> Resized
        let img = resize_to_fit(img, req.resize)?;
        deadline.check("resize")?;
        tracker.advance();

        // Resized -> Encoded
        let result = self.encode(&img, deadline)?;
        deadline.check("encode")?;
        tracker.advance();

        Ok(result)
    }

    fn decode(&self) -> Result<DynamicImage, ConvertError> {
        let req = &self.request;
        let kind = req.input_kind();
        debug!(kind = ?kind, bytes = req.image_bytes.len(), "decoding input");

        let (img, _format) = match kind {
            InputKind::Heic => {
                let jpeg = decode_heic(&req.image_bytes)?;
                decode_image(&jpeg)?
            }
            InputKind::Raster => {
                if let Some((w, h)) = read_dimensions(&req.image_bytes) {
                    self.limits.enforce_pixels(w, h)?;
                }
                decode_image(&req.image_bytes)?
            }
        };
        self.limits.enforce_pixels(img.width(), img.height())?;
        Ok(img)
    }

    fn encode(&self, img: &DynamicImage, deadline: Deadline<'_>) -> Result<ConversionResult, ConvertError> {
        let format = self.request.output_format;
        let bytes = match self.request.strategy() {
            EncodeStrategy::Quality(q) => encode_image(img, format, fixed_encode_quality(q))?,
            EncodeStrategy::TargetSize { kb, quality } => {
                let attempt =
                    compress_to_target(img, format, kb, quality, self.search, Some(deadline))?;
                debug!(
                    quality = attempt.quality,
                    scale = attempt.scale,
                    size_kb = attempt.size_kb,
                    "target search result"
                );
                attempt.bytes
            }
        };
        Ok(ConversionResult { bytes, format })
    }
}

/// Run one conversion with default search settings.
pub fn convert(request: ConversionRequest, limits: &Limits) -> Result<ConversionResult, ConvertError> {
    let search = SearchConfig::default();
    ConvertTask::new(request, limits, &search).run()
}
