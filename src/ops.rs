// src/ops.rs
//
// Conversion request model.
// These are cheap to create and move between threads - the expensive work happens in the engine.

use crate::error::ConvertError;
use std::str::FromStr;

/// Default quality when the caller does not send one.
pub const DEFAULT_QUALITY: u8 = 80;

/// Output format for encoding
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    Jpg,
    Png,
    WebP,
}

impl OutputFormat {
    /// Canonical token, also used as the file extension.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Jpg => "jpg",
            Self::Png => "png",
            Self::WebP => "webp",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Jpg => "image/jpeg",
            Self::Png => "image/png",
            Self::WebP => "image/webp",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = ConvertError;

    fn from_str(format: &str) -> Result<Self, Self::Err> {
        match format.trim().to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Ok(Self::Jpg),
            "png" => Ok(Self::Png),
            "webp" => Ok(Self::WebP),
            other => Err(ConvertError::invalid_format(other.to_string())),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fit-inside bounding box. `0` on either side means "auto" and disables resizing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResizeBox {
    pub width: u32,
    pub height: u32,
}

impl ResizeBox {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Resizing only happens when both sides are given.
    pub fn is_active(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

/// Which encode path a request takes. Exactly one is active per request.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum EncodeStrategy {
    /// Fixed-quality encode
    Quality(u8),
    /// Size-targeted search. `quality` still caps the WebP second stage.
    TargetSize { kb: f64, quality: u8 },
}

/// How the request handler should decode the upload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputKind {
    /// HEIC/HEIF container, goes through the HEIC decoder chain first
    Heic,
    /// Anything the raster decoders understand directly
    Raster,
}

impl InputKind {
    /// Classify an upload by declared content type, filename extension
    /// (case-insensitive) or, failing both, the ISO-BMFF `ftyp` brand.
    pub fn classify(content_type: Option<&str>, filename: &str, bytes: &[u8]) -> Self {
        let by_type = content_type
            .map(|ct| {
                let ct = ct.to_ascii_lowercase();
                ct == "image/heic" || ct == "image/heif"
            })
            .unwrap_or(false);
        let by_name = extension_of(filename)
            .map(|ext| ext == "heic" || ext == "heif")
            .unwrap_or(false);

        if by_type || by_name || has_heif_brand(bytes) {
            Self::Heic
        } else {
            Self::Raster
        }
    }
}

/// Lowercased extension after the last dot, if any.
pub fn extension_of(filename: &str) -> Option<String> {
    let (_, ext) = filename.rsplit_once('.')?;
    if ext.is_empty() {
        None
    } else {
        Some(ext.to_ascii_lowercase())
    }
}

const HEIF_BRANDS: [&[u8; 4]; 8] = [
    b"heic", b"heix", b"hevc", b"hevx", b"heim", b"heis", b"mif1", b"msf1",
];

/// `....ftyp<brand>` at offset 4.
pub fn has_heif_brand(bytes: &[u8]) -> bool {
    if bytes.len() < 12 || &bytes[4..8] != b"ftyp" {
        return false;
    }
    HEIF_BRANDS.iter().any(|brand| &bytes[8..12] == *brand)
}

/// A single conversion job, already parsed from whatever transport carried it.
#[derive(Clone, Debug)]
pub struct ConversionRequest {
    pub image_bytes: Vec<u8>,
    pub source_filename: String,
    pub content_type: Option<String>,
    pub output_format: OutputFormat,
    /// 1-100, clamped on construction
    pub quality: u8,
    pub resize: ResizeBox,
    /// `None` (or 0 from the wire) disables the size-targeted path
    pub target_size_kb: Option<f64>,
}

impl ConversionRequest {
    pub fn new(image_bytes: Vec<u8>, output_format: OutputFormat) -> Self {
        Self {
            image_bytes,
            source_filename: String::from("upload"),
            content_type: None,
            output_format,
            quality: DEFAULT_QUALITY,
            resize: ResizeBox::default(),
            target_size_kb: None,
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.source_filename = filename.into();
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_quality(mut self, quality: i64) -> Self {
        self.quality = clamp_quality(quality);
        self
    }

    pub fn with_resize(mut self, width: u32, height: u32) -> Self {
        self.resize = ResizeBox::new(width, height);
        self
    }

    /// Non-positive targets disable the size path.
    pub fn with_target_size_kb(mut self, kb: f64) -> Self {
        self.target_size_kb = if kb.is_finite() && kb > 0.0 {
            Some(kb)
        } else {
            None
        };
        self
    }

    pub fn strategy(&self) -> EncodeStrategy {
        match self.target_size_kb {
            Some(kb) if kb > 0.0 => EncodeStrategy::TargetSize {
                kb,
                quality: self.quality,
            },
            _ => EncodeStrategy::Quality(self.quality),
        }
    }

    pub fn input_kind(&self) -> InputKind {
        InputKind::classify(
            self.content_type.as_deref(),
            &self.source_filename,
            &self.image_bytes,
        )
    }
}

/// Clamp any integer into the 1-100 quality range.
pub fn clamp_quality(quality: i64) -> u8 {
    quality.clamp(1, 100) as u8
}

/// Encoded output of one conversion.
#[derive(Clone, Debug)]
pub struct ConversionResult {
    pub bytes: Vec<u8>,
    pub format: OutputFormat,
}

impl ConversionResult {
    pub fn content_type(&self) -> &'static str {
        self.format.content_type()
    }

    pub fn suggested_filename(&self) -> String {
        format!("converted.{}", self.format.as_str())
    }

    pub fn size_kb(&self) -> f64 {
        self.bytes.len() as f64 / 1024.0
    }
}
