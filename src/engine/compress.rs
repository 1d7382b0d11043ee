// src/engine/compress.rs
//
// Size-targeted compression: find an encoder quality (and if needed a
// downscale) whose output lands as close as possible to a target size
// without exceeding it, within a bounded number of encodes.
//
// The search driver (`TargetSearch`) is pure. It only sees a probe callback
// `Probe { quality, scale } -> EncodeAttempt`, so it can be driven by a real
// codec (`CodecProbe`) or by a size model in tests.

use crate::engine::common::EngineResult;
use crate::engine::decoder::decode_jpeg;
use crate::engine::encoder::encode_image;
use crate::engine::limits::Deadline;
use crate::engine::pipeline::scale_image;
use crate::error::ConvertError;
use crate::ops::OutputFormat;
use image::DynamicImage;
use tracing::{debug, warn};

/// Tuning knobs for the search. Defaults match the production behaviour.
#[derive(Clone, Debug, PartialEq)]
pub struct SearchConfig {
    pub min_quality: u8,
    pub max_quality: u8,
    /// Encodes allowed before the last resort (the last resort is extra)
    pub max_attempts: u32,
    /// Lower edge of the acceptance band, as a fraction of the target
    pub band_low: f64,
    /// Upper edge of the acceptance band, as a fraction of the target
    pub band_high: f64,
    /// Relaxed ceiling for the last-resort attempt
    pub last_resort_tolerance: f64,
    pub downscale_factor: f64,
    /// Targets below this (KB) cap quality at 60 and downscale every attempt
    pub small_target_kb: f64,
    /// Targets below this (KB) cap quality at 80
    pub medium_target_kb: f64,
    /// Attempts below this quality encode a downscaled image
    pub low_quality_threshold: u8,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            min_quality: 1,
            max_quality: 100,
            max_attempts: 15,
            band_low: 0.95,
            band_high: 1.05,
            last_resort_tolerance: 1.20,
            downscale_factor: 0.9,
            small_target_kb: 500.0,
            medium_target_kb: 1000.0,
            low_quality_threshold: 30,
        }
    }
}

impl SearchConfig {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_max_quality(mut self, max_quality: u8) -> Self {
        self.max_quality = max_quality;
        self
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.min_quality == 0 || self.min_quality > self.max_quality || self.max_quality > 100 {
            return Err(ConvertError::invalid_argument(
                "quality range",
                format!("{}..={}", self.min_quality, self.max_quality),
                "expected 1 <= min <= max <= 100",
            ));
        }
        if self.max_attempts == 0 {
            return Err(ConvertError::invalid_argument(
                "max_attempts",
                "0",
                "at least one attempt is required",
            ));
        }
        if !(self.downscale_factor > 0.0 && self.downscale_factor <= 1.0) {
            return Err(ConvertError::invalid_argument(
                "downscale_factor",
                self.downscale_factor.to_string(),
                "expected a value in (0, 1]",
            ));
        }
        if !(self.band_low <= 1.0 && 1.0 <= self.band_high && self.band_high <= self.last_resort_tolerance) {
            return Err(ConvertError::invalid_argument(
                "tolerance",
                format!(
                    "{}/{}/{}",
                    self.band_low, self.band_high, self.last_resort_tolerance
                ),
                "expected band_low <= 1 <= band_high <= last_resort_tolerance",
            ));
        }
        Ok(())
    }
}

/// One point the search wants encoded.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Probe {
    pub quality: u8,
    /// Linear scale applied to the working image before encoding
    pub scale: f64,
}

/// One encode produced during the search.
#[derive(Clone, Debug)]
pub struct EncodeAttempt {
    pub quality: u8,
    pub format: OutputFormat,
    pub scale: f64,
    pub bytes: Vec<u8>,
    pub size_kb: f64,
}

impl EncodeAttempt {
    pub fn new(probe: Probe, format: OutputFormat, bytes: Vec<u8>) -> Self {
        let size_kb = bytes.len() as f64 / 1024.0;
        Self {
            quality: probe.quality,
            format,
            scale: probe.scale,
            bytes,
            size_kb,
        }
    }
}

/// How an attempt relates to the target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// Within the acceptance band
    InBand,
    /// Acceptable, but more than the band's lower edge below the target
    Under,
    /// Above the band's upper edge
    Over,
}

/// Everything the search knows between steps.
#[derive(Clone, Debug)]
pub struct SearchState {
    pub lo: u8,
    pub hi: u8,
    pub attempts: u32,
    /// Largest acceptable attempt so far; ties go to the later (higher quality) one
    pub best: Option<EncodeAttempt>,
    /// Smallest size seen across all attempts, for the failure report
    pub smallest_kb: Option<f64>,
}

impl SearchState {
    fn new(lo: u8, hi: u8) -> Self {
        Self {
            lo,
            hi,
            attempts: 0,
            best: None,
            smallest_kb: None,
        }
    }

    /// Fold one attempt into the state and classify it.
    fn record(&mut self, attempt: EncodeAttempt, target_kb: f64, config: &SearchConfig) -> Verdict {
        self.attempts += 1;
        self.smallest_kb = Some(match self.smallest_kb {
            Some(s) => s.min(attempt.size_kb),
            None => attempt.size_kb,
        });

        if attempt.size_kb > target_kb * config.band_high {
            return Verdict::Over;
        }

        let verdict = if attempt.size_kb >= target_kb * config.band_low {
            Verdict::InBand
        } else {
            Verdict::Under
        };
        let better = self
            .best
            .as_ref()
            .map_or(true, |best| attempt.size_kb >= best.size_kb);
        if better {
            self.best = Some(attempt);
        }
        verdict
    }
}

/// Bounded quality search toward `target_kb`.
#[derive(Clone, Debug)]
pub struct TargetSearch {
    target_kb: f64,
    config: SearchConfig,
}

impl TargetSearch {
    pub fn new(target_kb: f64, config: SearchConfig) -> EngineResult<Self> {
        if !(target_kb.is_finite() && target_kb > 0.0) {
            return Err(ConvertError::invalid_argument(
                "targetFileSize",
                target_kb.to_string(),
                "target size must be a positive number of KB",
            ));
        }
        config.validate()?;
        Ok(Self { target_kb, config })
    }

    pub fn target_kb(&self) -> f64 {
        self.target_kb
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Highest quality worth trying for this target.
    pub fn ceiling(&self) -> u8 {
        let cap = if self.target_kb < self.config.small_target_kb {
            60
        } else if self.target_kb < self.config.medium_target_kb {
            80
        } else {
            self.config.max_quality
        };
        cap.min(self.config.max_quality).max(self.config.min_quality)
    }

    /// Scale applied to a regular attempt at `quality`.
    pub fn attempt_scale(&self, quality: u8) -> f64 {
        if self.target_kb < self.config.small_target_kb
            || quality < self.config.low_quality_threshold
        {
            self.config.downscale_factor
        } else {
            1.0
        }
    }

    /// Run the search. `probe` is called at most `max_attempts + 1` times.
    pub fn run<P>(&self, mut probe: P) -> EngineResult<EncodeAttempt>
    where
        P: FnMut(Probe) -> EngineResult<EncodeAttempt>,
    {
        let cfg = &self.config;
        let ceiling = self.ceiling();
        let mut state = SearchState::new(cfg.min_quality, ceiling);

        // The ceiling itself is the first candidate
        let first = self.probe_at(&mut probe, ceiling)?;
        match state.record(first, self.target_kb, cfg) {
            Verdict::Over => state.hi = ceiling.saturating_sub(1),
            Verdict::InBand | Verdict::Under => {
                return state
                    .best
                    .ok_or_else(|| ConvertError::internal_panic("search lost its first candidate"));
            }
        }

        // mid >= lo >= min_quality >= 1, so `mid - 1` cannot underflow
        while state.lo <= state.hi && state.attempts < cfg.max_attempts {
            let mid = ((state.lo as u16 + state.hi as u16) / 2) as u8;
            let attempt = self.probe_at(&mut probe, mid)?;
            match state.record(attempt, self.target_kb, cfg) {
                Verdict::InBand => break,
                Verdict::Under => state.lo = mid + 1,
                Verdict::Over => state.hi = mid - 1,
            }
        }

        if let Some(best) = state.best {
            debug!(
                quality = best.quality,
                size_kb = best.size_kb,
                attempts = state.attempts,
                "search settled"
            );
            return Ok(best);
        }

        self.last_resort(&mut probe, &state)
    }

    fn probe_at<P>(&self, probe: &mut P, quality: u8) -> EngineResult<EncodeAttempt>
    where
        P: FnMut(Probe) -> EngineResult<EncodeAttempt>,
    {
        let request = Probe {
            quality,
            scale: self.attempt_scale(quality),
        };
        let attempt = probe(request)?;
        debug!(
            quality,
            scale = request.scale,
            size_kb = attempt.size_kb,
            target_kb = self.target_kb,
            "search attempt"
        );
        Ok(attempt)
    }

    /// Minimum quality on a further-downscaled image, judged against the relaxed tolerance.
    fn last_resort<P>(&self, probe: &mut P, state: &SearchState) -> EngineResult<EncodeAttempt>
    where
        P: FnMut(Probe) -> EngineResult<EncodeAttempt>,
    {
        let cfg = &self.config;
        let request = Probe {
            quality: cfg.min_quality,
            scale: self.attempt_scale(cfg.min_quality) * cfg.downscale_factor,
        };
        let attempt = probe(request)?;
        debug!(
            scale = request.scale,
            size_kb = attempt.size_kb,
            "last resort attempt"
        );

        if attempt.size_kb <= self.target_kb * cfg.last_resort_tolerance {
            return Ok(attempt);
        }

        let smallest_kb = state
            .smallest_kb
            .map_or(attempt.size_kb, |s| s.min(attempt.size_kb));
        Err(ConvertError::target_unreachable(self.target_kb, smallest_kb))
    }
}

/// Codec-backed probe: encodes the working image, caching each scaled copy
/// so repeated attempts at one scale resample only once.
pub struct CodecProbe<'a> {
    image: &'a DynamicImage,
    format: OutputFormat,
    scaled: Vec<(u64, DynamicImage)>,
    deadline: Option<Deadline<'a>>,
    encodes: u32,
}

impl<'a> CodecProbe<'a> {
    pub fn new(image: &'a DynamicImage, format: OutputFormat) -> Self {
        Self {
            image,
            format,
            scaled: Vec::new(),
            deadline: None,
            encodes: 0,
        }
    }

    pub fn with_deadline(mut self, deadline: Deadline<'a>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Number of encodes performed so far.
    pub fn encodes(&self) -> u32 {
        self.encodes
    }

    pub fn probe(&mut self, request: Probe) -> EngineResult<EncodeAttempt> {
        if let Some(deadline) = &self.deadline {
            deadline.check("compress")?;
        }
        let format = self.format;
        let bytes = {
            let img = self.image_at(request.scale)?;
            encode_image(img, format, request.quality)?
        };
        self.encodes += 1;
        Ok(EncodeAttempt::new(request, format, bytes))
    }

    fn image_at(&mut self, scale: f64) -> EngineResult<&DynamicImage> {
        if scale >= 1.0 {
            return Ok(self.image);
        }
        let key = scale.to_bits();
        let idx = match self.scaled.iter().position(|(k, _)| *k == key) {
            Some(idx) => idx,
            None => {
                let img = scale_image(self.image, scale)?;
                self.scaled.push((key, img));
                self.scaled.len() - 1
            }
        };
        Ok(&self.scaled[idx].1)
    }
}

/// Compress `image` toward `target_kb` in `format`.
///
/// JPEG and PNG run the search directly. WebP searches in JPEG first (quality
/// capped at 95), decodes that JPEG and re-encodes it as WebP, with at most one
/// corrective second pass.
pub fn compress_to_target(
    image: &DynamicImage,
    format: OutputFormat,
    target_kb: f64,
    requested_quality: u8,
    config: &SearchConfig,
    deadline: Option<Deadline<'_>>,
) -> EngineResult<EncodeAttempt> {
    match format {
        OutputFormat::Jpg | OutputFormat::Png => {
            let search = TargetSearch::new(target_kb, config.clone())?;
            let mut probe = CodecProbe::new(image, format);
            if let Some(deadline) = deadline {
                probe = probe.with_deadline(deadline);
            }
            search.run(|request| probe.probe(request))
        }
        OutputFormat::WebP => {
            compress_webp_via_jpeg(image, target_kb, requested_quality, config, deadline)
        }
    }
}

fn compress_webp_via_jpeg(
    image: &DynamicImage,
    target_kb: f64,
    requested_quality: u8,
    config: &SearchConfig,
    deadline: Option<Deadline<'_>>,
) -> EngineResult<EncodeAttempt> {
    let jpeg_config = config.clone().with_max_quality(config.max_quality.min(95));
    let search = TargetSearch::new(target_kb, jpeg_config)?;
    let mut probe = CodecProbe::new(image, OutputFormat::Jpg);
    if let Some(deadline) = deadline {
        probe = probe.with_deadline(deadline);
    }
    let jpeg = search.run(|request| probe.probe(request))?;

    if let Some(deadline) = &deadline {
        deadline.check("compress")?;
    }
    let intermediate = decode_jpeg(&jpeg.bytes)?;

    let q0 = requested_quality.clamp(config.min_quality, 90.max(config.min_quality));
    let first = EncodeAttempt::new(
        Probe {
            quality: q0,
            scale: jpeg.scale,
        },
        OutputFormat::WebP,
        encode_image(&intermediate, OutputFormat::WebP, q0)?,
    );
    if first.size_kb <= target_kb {
        return Ok(first);
    }

    let q1 = second_pass_quality(q0, target_kb, first.size_kb, config.min_quality);
    if let Some(deadline) = &deadline {
        deadline.check("compress")?;
    }
    let second = EncodeAttempt::new(
        Probe {
            quality: q1,
            scale: jpeg.scale,
        },
        OutputFormat::WebP,
        encode_image(&intermediate, OutputFormat::WebP, q1)?,
    );
    if second.size_kb > target_kb * config.band_high {
        warn!(
            target_kb,
            size_kb = second.size_kb,
            quality = q1,
            "webp second pass still over target"
        );
    }
    Ok(second)
}

/// Proportional correction: `floor(q0 * target / size * 0.95)`, kept within
/// `[min_quality, q0 - 1]`.
pub fn second_pass_quality(q0: u8, target_kb: f64, size_kb: f64, min_quality: u8) -> u8 {
    let upper = q0.saturating_sub(1).max(min_quality);
    let raw = (q0 as f64 * target_kb / size_kb * 0.95).floor();
    let raw = if raw.is_finite() { raw.max(0.0).min(100.0) as u8 } else { min_quality };
    raw.clamp(min_quality, upper)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    /// Attempt with `kb` kilobytes of payload.
    fn fake_attempt(probe: Probe, kb: f64) -> EngineResult<EncodeAttempt> {
        let len = (kb * 1024.0).round().max(0.0) as usize;
        Ok(EncodeAttempt::new(probe, OutputFormat::Jpg, vec![0u8; len]))
    }

    fn search(target_kb: f64) -> TargetSearch {
        TargetSearch::new(target_kb, SearchConfig::default()).unwrap()
    }

    mod driver_tests {
        use super::*;

        #[test]
        fn ceiling_depends_on_target_magnitude() {
            assert_eq!(search(100.0).ceiling(), 60);
            assert_eq!(search(499.9).ceiling(), 60);
            assert_eq!(search(500.0).ceiling(), 80);
            assert_eq!(search(999.0).ceiling(), 80);
            assert_eq!(search(1000.0).ceiling(), 100);

            let capped = TargetSearch::new(
                2000.0,
                SearchConfig::default().with_max_quality(95),
            )
            .unwrap();
            assert_eq!(capped.ceiling(), 95);
        }

        #[test]
        fn attempt_scale_rules() {
            let small = search(200.0);
            assert_eq!(small.attempt_scale(60), 0.9);
            let large = search(2000.0);
            assert_eq!(large.attempt_scale(30), 1.0);
            assert_eq!(large.attempt_scale(29), 0.9);
        }

        #[test]
        fn returns_immediately_when_ceiling_fits() {
            let calls = Cell::new(0);
            let result = search(1000.0)
                .run(|p| {
                    calls.set(calls.get() + 1);
                    fake_attempt(p, p.quality as f64 * 10.0)
                })
                .unwrap();
            assert_eq!(calls.get(), 1);
            assert_eq!(result.quality, 100);
        }

        #[test]
        fn monotone_model_lands_in_band() {
            let s = search(300.0);
            let calls = Cell::new(0);
            let result = s
                .run(|p| {
                    calls.set(calls.get() + 1);
                    fake_attempt(p, p.quality as f64 * 12.0 * p.scale * p.scale)
                })
                .unwrap();
            assert!(result.size_kb <= 300.0 * 1.05);
            assert!(result.size_kb >= 300.0 * 0.95);
            assert!(calls.get() <= 15);
            assert_eq!(result.scale, 0.9);
        }

        #[test]
        fn keeps_largest_acceptable_when_band_is_missed() {
            // Step function: nothing between 500KB and 2000KB
            let result = search(1000.0)
                .run(|p| fake_attempt(p, if p.quality < 50 { 500.0 } else { 2000.0 }))
                .unwrap();
            assert_eq!(result.quality, 49);
            assert!((result.size_kb - 500.0).abs() < 0.01);
        }

        #[test]
        fn last_resort_accepted_within_relaxed_tolerance() {
            // Every regular attempt is just over 1.05T; the compounded
            // 0.81 scale at quality 1 brings it under 1.2T.
            let calls = Cell::new(0);
            let result = search(1000.0)
                .run(|p| {
                    calls.set(calls.get() + 1);
                    fake_attempt(p, 1300.0 * p.scale * p.scale + p.quality as f64)
                })
                .unwrap();
            assert_eq!(result.quality, 1);
            assert!((result.scale - 0.81).abs() < 1e-9);
            assert!(result.size_kb <= 1200.0);
            assert!(calls.get() <= 16);
        }

        #[test]
        fn unreachable_reports_smallest_size() {
            let err = search(10.0)
                .run(|p| fake_attempt(p, 100.0 * p.scale))
                .unwrap_err();
            match err {
                ConvertError::TargetUnreachable {
                    target_kb,
                    smallest_kb,
                } => {
                    assert_eq!(target_kb, 10.0);
                    assert!((smallest_kb - 81.0).abs() < 0.01);
                }
                other => panic!("unexpected error: {other}"),
            }
        }

        #[test]
        fn non_monotone_model_terminates_within_cap() {
            let calls = Cell::new(0u32);
            let _ = search(700.0).run(|p| {
                calls.set(calls.get() + 1);
                fake_attempt(p, ((p.quality as u32 * 7919) % 97) as f64 * 20.0)
            });
            assert!(calls.get() <= 16);
        }

        #[test]
        fn attempt_cap_is_respected() {
            let config = SearchConfig::default().with_max_attempts(3);
            let s = TargetSearch::new(5000.0, config).unwrap();
            let calls = Cell::new(0u32);
            let _ = s.run(|p| {
                calls.set(calls.get() + 1);
                fake_attempt(p, 1_000_000.0)
            });
            // three regular attempts plus the last resort
            assert_eq!(calls.get(), 4);
        }

        #[test]
        fn probe_errors_propagate() {
            let err = search(100.0)
                .run(|_| Err(ConvertError::encode_failed("jpg", "boom")))
                .unwrap_err();
            assert!(matches!(err, ConvertError::EncodeFailed { .. }));
        }

        #[test]
        fn search_is_deterministic() {
            let model = |p: Probe| fake_attempt(p, p.quality as f64 * 7.3 * p.scale);
            let a = search(250.0).run(model).unwrap();
            let b = search(250.0).run(model).unwrap();
            assert_eq!(a.quality, b.quality);
            assert_eq!(a.bytes.len(), b.bytes.len());
        }

        #[test]
        fn invalid_targets_and_configs_rejected() {
            assert!(TargetSearch::new(0.0, SearchConfig::default()).is_err());
            assert!(TargetSearch::new(f64::NAN, SearchConfig::default()).is_err());
            assert!(TargetSearch::new(10.0, SearchConfig::default().with_max_attempts(0)).is_err());
            let inverted = SearchConfig {
                min_quality: 90,
                max_quality: 10,
                ..SearchConfig::default()
            };
            assert!(TargetSearch::new(10.0, inverted).is_err());
        }

        #[test]
        fn second_pass_quality_bounds() {
            assert_eq!(second_pass_quality(90, 100.0, 200.0, 1), 42);
            // Never above q0 - 1
            assert_eq!(second_pass_quality(90, 100.0, 100.5, 1), 85);
            assert_eq!(second_pass_quality(90, 100.0, 100.01, 1), 85);
            // Never below min
            assert_eq!(second_pass_quality(90, 1.0, 10_000.0, 5), 5);
            // Degenerate q0 at the floor
            assert_eq!(second_pass_quality(1, 10.0, 20.0, 1), 1);
        }
    }

    mod codec_tests {
        use super::*;
        use image::RgbImage;

        fn noise_image(width: u32, height: u32) -> DynamicImage {
            let mut state: u32 = 0x1234_5678;
            DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
                state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                let n = (state >> 24) as u8;
                image::Rgb([n, (x as u8).wrapping_add(n / 4), (y as u8).wrapping_mul(3)])
            }))
        }

        fn grainy_photo(width: u32, height: u32) -> DynamicImage {
            DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
                let h = (x.wrapping_mul(73_856_093) ^ y.wrapping_mul(19_349_663))
                    .wrapping_mul(2_654_435_761);
                let grain = |shift: u32| ((h >> shift) & 0xFF) * 4 / 5;
                let base = [x * 51 / width, y * 51 / height, (x + y) * 51 / (width + height)];
                image::Rgb([
                    (base[0] + grain(24)) as u8,
                    (base[1] + grain(8)) as u8,
                    (base[2] + grain(16)) as u8,
                ])
            }))
        }

        /// 1200x900 grain at 120 KB: the ceiling probe overshoots, so the
        /// quality search has to do the work.
        fn overshooting_case() -> (DynamicImage, f64) {
            let img = grainy_photo(1200, 900);
            let target_kb = 120.0;
            let first = encode_image(&scale_image(&img, 0.9).unwrap(), OutputFormat::Jpg, 60)
                .unwrap();
            assert!(
                first.len() as f64 / 1024.0 > target_kb * 1.05,
                "ceiling probe already fits ({} bytes)",
                first.len()
            );
            (img, target_kb)
        }

        #[test]
        fn jpeg_search_lands_in_band_below_ceiling() {
            let (img, target_kb) = overshooting_case();
            let result = compress_to_target(
                &img,
                OutputFormat::Jpg,
                target_kb,
                80,
                &SearchConfig::default(),
                None,
            )
            .unwrap();
            assert!(result.quality < 60, "quality {}", result.quality);
            assert_eq!(result.scale, 0.9);
            assert!(
                result.size_kb >= target_kb * 0.95 && result.size_kb <= target_kb * 1.05,
                "size {} KB at q{}",
                result.size_kb,
                result.quality
            );
            let decoded = image::load_from_memory(&result.bytes).unwrap();
            assert_eq!((decoded.width(), decoded.height()), (1080, 810));
        }

        #[test]
        fn webp_search_corrects_toward_target() {
            let (img, target_kb) = overshooting_case();
            let result = compress_to_target(
                &img,
                OutputFormat::WebP,
                target_kb,
                80,
                &SearchConfig::default(),
                None,
            )
            .unwrap();
            assert_eq!(&result.bytes[8..12], b"WEBP");
            assert_eq!(result.scale, 0.9);
            assert!(result.quality <= 80);
            // A second pass only happens below q0, and returns even if still over
            assert!(
                result.size_kb <= target_kb || result.quality < 80,
                "over target without a second pass: {} KB",
                result.size_kb
            );
            assert!(result.size_kb <= target_kb * 2.0, "size {} KB", result.size_kb);
        }

        #[test]
        fn jpeg_target_is_met() {
            let img = noise_image(256, 256);
            let result =
                compress_to_target(&img, OutputFormat::Jpg, 40.0, 80, &SearchConfig::default(), None)
                    .unwrap();
            assert_eq!(&result.bytes[0..2], &[0xFF, 0xD8]);
            assert!(result.size_kb <= 40.0 * 1.2);
        }

        #[test]
        fn webp_goes_through_jpeg_and_returns_webp() {
            let img = noise_image(192, 192);
            let result =
                compress_to_target(&img, OutputFormat::WebP, 30.0, 80, &SearchConfig::default(), None)
                    .unwrap();
            assert_eq!(result.format, OutputFormat::WebP);
            assert_eq!(&result.bytes[0..4], b"RIFF");
            assert_eq!(&result.bytes[8..12], b"WEBP");
        }

        #[test]
        fn impossible_target_is_unreachable() {
            let img = noise_image(128, 128);
            let err =
                compress_to_target(&img, OutputFormat::Jpg, 0.1, 80, &SearchConfig::default(), None)
                    .unwrap_err();
            assert!(matches!(err, ConvertError::TargetUnreachable { .. }));
        }

        #[test]
        fn probe_caches_scaled_images() {
            let img = noise_image(64, 64);
            let mut probe = CodecProbe::new(&img, OutputFormat::Jpg);
            probe.probe(Probe { quality: 50, scale: 0.9 }).unwrap();
            probe.probe(Probe { quality: 40, scale: 0.9 }).unwrap();
            probe.probe(Probe { quality: 40, scale: 1.0 }).unwrap();
            assert_eq!(probe.scaled.len(), 1);
            assert_eq!(probe.encodes(), 3);
        }

        #[test]
        fn expired_deadline_stops_the_search() {
            let img = noise_image(64, 64);
            let limits = crate::engine::limits::Limits::default().with_timeout_ms(0);
            let deadline = Deadline::start(&limits);
            std::thread::sleep(std::time::Duration::from_millis(5));
            let err = compress_to_target(
                &img,
                OutputFormat::Jpg,
                5.0,
                80,
                &SearchConfig::default(),
                Some(deadline),
            )
            .unwrap_err();
            assert!(matches!(err, ConvertError::Timeout { .. }));
        }
    }
}
