// src/engine/heic.rs
//
// HEIC/HEIF to JPEG conversion through an ordered chain of decoder strategies.

use crate::engine::common::{run_with_panic_policy, EngineResult};
use crate::engine::encoder::encode_jpeg_baseline;
use crate::error::ConvertError;
use image::DynamicImage;
use tracing::{debug, warn};

/// Quality of the intermediate JPEG handed to the raster pipeline.
const INTERMEDIATE_JPEG_QUALITY: u8 = 100;

/// One way of getting pixels out of a HEIC container.
pub trait HeicDecoder: Send + Sync {
    fn name(&self) -> &'static str;
    fn decode(&self, data: &[u8]) -> EngineResult<DynamicImage>;
}

/// libheif-backed decoder (requires the `heif` feature).
#[cfg(feature = "heif")]
pub struct LibheifDecoder;

#[cfg(feature = "heif")]
impl HeicDecoder for LibheifDecoder {
    fn name(&self) -> &'static str {
        "libheif"
    }

    fn decode(&self, data: &[u8]) -> EngineResult<DynamicImage> {
        run_with_panic_policy("decode:heic:libheif", || {
            crate::codecs::heif::decode_primary_rgb(data).map(DynamicImage::ImageRgb8)
        })
    }
}

/// Asks the image crate to open the container directly. Only some builds
/// have a HEIF plugin, so this usually fails; it is the last resort.
pub struct ImageCrateHeicDecoder;

impl HeicDecoder for ImageCrateHeicDecoder {
    fn name(&self) -> &'static str {
        "image"
    }

    fn decode(&self, data: &[u8]) -> EngineResult<DynamicImage> {
        run_with_panic_policy("decode:heic:image", || {
            image::load_from_memory(data)
                .map_err(|e| ConvertError::heic_conversion_failed(e.to_string()))
        })
    }
}

/// Whether a dedicated HEIC decoder was compiled in.
pub fn libheif_available() -> bool {
    cfg!(feature = "heif")
}

/// Strategies in the order they are attempted.
pub fn default_chain() -> Vec<Box<dyn HeicDecoder>> {
    let mut chain: Vec<Box<dyn HeicDecoder>> = Vec::with_capacity(2);
    #[cfg(feature = "heif")]
    chain.push(Box::new(LibheifDecoder));
    chain.push(Box::new(ImageCrateHeicDecoder));
    chain
}

/// Convert HEIC bytes to JPEG bytes using the default strategy chain.
pub fn decode_heic(data: &[u8]) -> EngineResult<Vec<u8>> {
    decode_heic_with(&default_chain(), data)
}

/// Try each strategy in turn. The first one to produce pixels wins; if none
/// does, the error lists every strategy's failure.
pub fn decode_heic_with(chain: &[Box<dyn HeicDecoder>], data: &[u8]) -> EngineResult<Vec<u8>> {
    let mut failures = Vec::with_capacity(chain.len());

    for decoder in chain {
        match decoder.decode(data) {
            Ok(img) => {
                debug!(strategy = decoder.name(), "heic decoded");
                return encode_jpeg_baseline(&img, INTERMEDIATE_JPEG_QUALITY);
            }
            Err(err) => {
                debug!(strategy = decoder.name(), error = %err, "heic strategy failed");
                failures.push(format!("{}: {}", decoder.name(), detail_of(&err)));
            }
        }
    }

    let detail = if failures.is_empty() {
        "no HEIC decoder available".to_string()
    } else {
        failures.join("; ")
    };
    warn!(detail = %detail, "all heic strategies failed");
    Err(ConvertError::heic_conversion_failed(detail))
}

fn detail_of(err: &ConvertError) -> String {
    match err {
        ConvertError::HeicConversionFailed { message } => message.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    struct AlwaysFails(&'static str);

    impl HeicDecoder for AlwaysFails {
        fn name(&self) -> &'static str {
            self.0
        }

        fn decode(&self, _data: &[u8]) -> EngineResult<DynamicImage> {
            Err(ConvertError::heic_conversion_failed(format!("{} refused", self.0)))
        }
    }

    struct Solid;

    impl HeicDecoder for Solid {
        fn name(&self) -> &'static str {
            "solid"
        }

        fn decode(&self, _data: &[u8]) -> EngineResult<DynamicImage> {
            Ok(DynamicImage::ImageRgb8(RgbImage::from_pixel(
                8,
                6,
                image::Rgb([200, 10, 10]),
            )))
        }
    }

    struct Panics;

    impl HeicDecoder for Panics {
        fn name(&self) -> &'static str {
            "panics"
        }

        fn decode(&self, _data: &[u8]) -> EngineResult<DynamicImage> {
            run_with_panic_policy("decode:heic:test", || panic!("native decoder crashed"))
        }
    }

    #[test]
    fn first_success_wins_and_yields_jpeg() {
        let chain: Vec<Box<dyn HeicDecoder>> = vec![Box::new(AlwaysFails("a")), Box::new(Solid)];
        let jpeg = decode_heic_with(&chain, b"ignored").unwrap();
        assert_eq!(&jpeg[0..2], &[0xFF, 0xD8]);
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (8, 6));
    }

    #[test]
    fn all_failures_are_listed() {
        let chain: Vec<Box<dyn HeicDecoder>> =
            vec![Box::new(AlwaysFails("first")), Box::new(Panics)];
        let err = decode_heic_with(&chain, b"ignored").unwrap_err();
        assert!(matches!(err, ConvertError::HeicConversionFailed { .. }));
        let msg = err.to_string();
        assert!(msg.contains("first refused"));
        assert!(msg.contains("native decoder crashed"));
    }

    #[test]
    fn empty_chain_fails() {
        let err = decode_heic_with(&[], b"ignored").unwrap_err();
        assert!(err.to_string().contains("no HEIC decoder available"));
    }

    #[test]
    fn corrupt_heic_fails_with_default_chain() {
        let mut bogus = vec![0, 0, 0, 24];
        bogus.extend_from_slice(b"ftypheic");
        bogus.extend_from_slice(&[0xEE; 64]);
        let err = decode_heic(&bogus).unwrap_err();
        assert!(matches!(err, ConvertError::HeicConversionFailed { .. }));
    }
}
