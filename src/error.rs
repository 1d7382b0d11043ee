// src/error.rs
//
// Unified error handling for imgconv
// Uses thiserror for simple, type-safe error handling
//
// Error Taxonomy:
// - Validation: bad or missing request input, user must fix it
// - UnsupportedInput: the source image cannot be decoded
// - Codec: encoder/resizer rejected the request
// - TargetUnreachable: size-targeted search exhausted
// - ResourceLimit: wall-clock budget exceeded
// - InternalBug: caught panics (should not happen)
// - Transport: the batch client could not reach the server

use std::borrow::Cow;
use thiserror::Error;

/// Error taxonomy used by the HTTP boundary and the batch orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Invalid or missing input, recoverable by the user
    Validation,
    /// Undecodable source image
    UnsupportedInput,
    /// Encode/resize failures
    Codec,
    /// Target-size search could not meet even the relaxed tolerance
    TargetUnreachable,
    /// Time budget exceeded
    ResourceLimit,
    /// Library bugs (should not happen)
    InternalBug,
    /// Client-side only: request never got an HTTP answer
    Transport,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Validation => "ValidationError",
            ErrorCategory::UnsupportedInput => "UnsupportedInputError",
            ErrorCategory::Codec => "EncodeError",
            ErrorCategory::TargetUnreachable => "TargetUnreachable",
            ErrorCategory::ResourceLimit => "Timeout",
            ErrorCategory::InternalBug => "InternalError",
            ErrorCategory::Transport => "NetworkError",
        }
    }
}

/// imgconv error types
#[derive(Debug, Clone, Error)]
pub enum ConvertError {
    // Validation Errors
    #[error("File and format are required")]
    MissingInput,

    #[error("Unsupported output format: '{format}'. Expected jpg, png or webp")]
    InvalidFormat { format: Cow<'static, str> },

    #[error("Invalid value for {name}: '{value}'. {reason}")]
    InvalidArgument {
        name: Cow<'static, str>,
        value: Cow<'static, str>,
        reason: Cow<'static, str>,
    },

    #[error("File size {size} bytes exceeds the {limit_mb}MB limit")]
    FileTooLarge { size: u64, limit_mb: u64 },

    #[error("Unsupported input file type: {kind}")]
    UnsupportedInputType { kind: Cow<'static, str> },

    // Decode Errors
    #[error("Failed to decode image: {message}")]
    DecodeFailed { message: Cow<'static, str> },

    #[error("HEIC conversion failed: {message}")]
    HeicConversionFailed { message: Cow<'static, str> },

    #[error("Image dimension {dimension} exceeds maximum {max}")]
    DimensionExceedsLimit { dimension: u32, max: u32 },

    #[error("Image pixel count {pixels} exceeds maximum {max}")]
    PixelCountExceedsLimit { pixels: u64, max: u64 },

    // Encode Errors
    #[error("Failed to encode as {format}: {message}")]
    EncodeFailed {
        format: Cow<'static, str>,
        message: Cow<'static, str>,
    },

    #[error("Resize failed ({source_width}x{source_height} -> {target_width}x{target_height}): {message}")]
    ResizeFailed {
        source_width: u32,
        source_height: u32,
        target_width: u32,
        target_height: u32,
        message: Cow<'static, str>,
    },

    #[error(
        "Could not reach target size of {target_kb:.0}KB; smallest achievable size was {smallest_kb:.1}KB"
    )]
    TargetUnreachable { target_kb: f64, smallest_kb: f64 },

    // Resource Errors
    #[error("Processing exceeded {limit_ms}ms budget at {stage} stage")]
    Timeout {
        stage: Cow<'static, str>,
        limit_ms: u64,
    },

    // Internal Errors
    #[error("Internal error: {message}")]
    InternalPanic { message: Cow<'static, str> },

    // Client Errors
    #[error("Server rejected conversion ({status}): {message}")]
    Remote {
        status: u16,
        message: Cow<'static, str>,
        details: Option<Cow<'static, str>>,
    },

    #[error("Request to conversion service failed: {message}")]
    Transport { message: Cow<'static, str> },
}

// Constructor Helpers
impl ConvertError {
    pub fn missing_input() -> Self {
        Self::MissingInput
    }

    pub fn invalid_format(format: impl Into<Cow<'static, str>>) -> Self {
        Self::InvalidFormat {
            format: format.into(),
        }
    }

    pub fn invalid_argument(
        name: impl Into<Cow<'static, str>>,
        value: impl Into<Cow<'static, str>>,
        reason: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::InvalidArgument {
            name: name.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    pub fn file_too_large(size: u64, limit_bytes: u64) -> Self {
        Self::FileTooLarge {
            size,
            limit_mb: limit_bytes / (1024 * 1024),
        }
    }

    pub fn unsupported_input_type(kind: impl Into<Cow<'static, str>>) -> Self {
        Self::UnsupportedInputType { kind: kind.into() }
    }

    pub fn decode_failed(message: impl Into<Cow<'static, str>>) -> Self {
        Self::DecodeFailed {
            message: message.into(),
        }
    }

    pub fn heic_conversion_failed(message: impl Into<Cow<'static, str>>) -> Self {
        Self::HeicConversionFailed {
            message: message.into(),
        }
    }

    pub fn dimension_exceeds_limit(dimension: u32, max: u32) -> Self {
        Self::DimensionExceedsLimit { dimension, max }
    }

    pub fn pixel_count_exceeds_limit(pixels: u64, max: u64) -> Self {
        Self::PixelCountExceedsLimit { pixels, max }
    }

    pub fn encode_failed(
        format: impl Into<Cow<'static, str>>,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::EncodeFailed {
            format: format.into(),
            message: message.into(),
        }
    }

    pub fn resize_failed(
        source_dims: (u32, u32),
        target_dims: (u32, u32),
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::ResizeFailed {
            source_width: source_dims.0,
            source_height: source_dims.1,
            target_width: target_dims.0,
            target_height: target_dims.1,
            message: message.into(),
        }
    }

    pub fn target_unreachable(target_kb: f64, smallest_kb: f64) -> Self {
        Self::TargetUnreachable {
            target_kb,
            smallest_kb,
        }
    }

    pub fn timeout(stage: impl Into<Cow<'static, str>>, limit_ms: u64) -> Self {
        Self::Timeout {
            stage: stage.into(),
            limit_ms,
        }
    }

    pub fn internal_panic(message: impl Into<Cow<'static, str>>) -> Self {
        Self::InternalPanic {
            message: message.into(),
        }
    }

    pub fn remote(
        status: u16,
        message: impl Into<Cow<'static, str>>,
        details: Option<String>,
    ) -> Self {
        Self::Remote {
            status,
            message: message.into(),
            details: details.map(Cow::Owned),
        }
    }

    pub fn transport(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Check if this error is recoverable (user can fix it by changing the request)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Validation | ErrorCategory::TargetUnreachable
        )
    }

    /// Dimension or pixel ceilings; retrying with another decoder cannot help.
    pub fn is_limit(&self) -> bool {
        matches!(
            self,
            Self::DimensionExceedsLimit { .. } | Self::PixelCountExceedsLimit { .. }
        )
    }

    /// Get the error category for this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::MissingInput
            | Self::InvalidFormat { .. }
            | Self::InvalidArgument { .. }
            | Self::FileTooLarge { .. }
            | Self::UnsupportedInputType { .. } => ErrorCategory::Validation,

            Self::DecodeFailed { .. }
            | Self::HeicConversionFailed { .. }
            | Self::DimensionExceedsLimit { .. }
            | Self::PixelCountExceedsLimit { .. } => ErrorCategory::UnsupportedInput,

            Self::EncodeFailed { .. } | Self::ResizeFailed { .. } => ErrorCategory::Codec,

            Self::TargetUnreachable { .. } => ErrorCategory::TargetUnreachable,

            Self::Timeout { .. } => ErrorCategory::ResourceLimit,

            Self::InternalPanic { .. } => ErrorCategory::InternalBug,

            Self::Remote { status, .. } => match status {
                400..=499 => ErrorCategory::Validation,
                504 => ErrorCategory::ResourceLimit,
                _ => ErrorCategory::Codec,
            },

            Self::Transport { .. } => ErrorCategory::Transport,
        }
    }

    /// Short, client-facing summary. The full `Display` text is sent as `details`.
    pub fn summary(&self) -> Cow<'static, str> {
        match self {
            Self::MissingInput => Cow::Borrowed("File and format are required"),
            Self::FileTooLarge { limit_mb, .. } => {
                Cow::Owned(format!("File size exceeds the {limit_mb}MB limit"))
            }
            Self::InvalidFormat { .. }
            | Self::InvalidArgument { .. }
            | Self::UnsupportedInputType { .. } => Cow::Owned(self.to_string()),
            Self::HeicConversionFailed { .. } => Cow::Borrowed("HEIC conversion failed"),
            Self::DecodeFailed { .. }
            | Self::DimensionExceedsLimit { .. }
            | Self::PixelCountExceedsLimit { .. } => Cow::Borrowed("Failed to decode image"),
            Self::EncodeFailed { .. } | Self::ResizeFailed { .. } => {
                Cow::Borrowed("Image conversion failed")
            }
            Self::TargetUnreachable { .. } => Cow::Owned(self.to_string()),
            Self::Timeout { .. } => Cow::Borrowed("Image processing timed out"),
            Self::InternalPanic { .. } => Cow::Borrowed("Internal server error"),
            Self::Remote { message, .. } => message.clone(),
            Self::Transport { .. } => Cow::Borrowed("Could not reach the conversion service"),
        }
    }
}

// Result type alias
pub type Result<T> = std::result::Result<T, ConvertError>;
