// src/engine/pipeline.rs
//
// Resize operations: fit-inside bounding box and linear downscale, Lanczos3 via fast_image_resize

use crate::error::ConvertError;
use crate::ops::ResizeBox;
use fast_image_resize::{self as fir, ImageBufferError, MulDiv, PixelType, ResizeOptions};
use image::{imageops::FilterType, DynamicImage, RgbImage, RgbaImage};
use tracing::debug;

type PipelineResult<T> = std::result::Result<T, ConvertError>;

#[derive(Debug)]
pub struct ResizeError {
    pub source_dims: (u32, u32),
    pub target_dims: (u32, u32),
    pub reason: String,
}

impl ResizeError {
    pub fn new(
        source_dims: (u32, u32),
        target_dims: (u32, u32),
        reason: impl Into<String>,
    ) -> Self {
        Self {
            source_dims,
            target_dims,
            reason: reason.into(),
        }
    }
}

impl From<ResizeError> for ConvertError {
    fn from(err: ResizeError) -> Self {
        ConvertError::resize_failed(err.source_dims, err.target_dims, err.reason)
    }
}

/// Fit-inside target dimensions for `bounds`, or `None` when no resize
/// should happen: the box is inactive, or the image already fits (never enlarge).
pub fn calc_fit_inside(orig_w: u32, orig_h: u32, bounds: ResizeBox) -> Option<(u32, u32)> {
    if !bounds.is_active() || orig_w == 0 || orig_h == 0 {
        return None;
    }
    if orig_w <= bounds.width && orig_h <= bounds.height {
        return None;
    }

    let ratio = (bounds.width as f64 / orig_w as f64).min(bounds.height as f64 / orig_h as f64);
    let w = ((orig_w as f64 * ratio).round() as u32).clamp(1, bounds.width);
    let h = ((orig_h as f64 * ratio).round() as u32).clamp(1, bounds.height);
    Some((w, h))
}

/// Dimensions after a linear downscale by `factor`, floored, at least 1px.
pub fn calc_scaled_dimensions(orig_w: u32, orig_h: u32, factor: f64) -> (u32, u32) {
    let w = ((orig_w as f64 * factor).floor() as u32).max(1);
    let h = ((orig_h as f64 * factor).floor() as u32).max(1);
    (w, h)
}

/// Resize to fit inside `bounds`, preserving aspect ratio. Returns the image
/// untouched when no resize applies.
pub fn resize_to_fit(img: DynamicImage, bounds: ResizeBox) -> PipelineResult<DynamicImage> {
    match calc_fit_inside(img.width(), img.height(), bounds) {
        Some((w, h)) => {
            debug!(from = ?(img.width(), img.height()), to = ?(w, h), "resize to fit");
            Ok(lanczos_resize(img, w, h)?)
        }
        None => Ok(img),
    }
}

/// Linear downscale by `factor` in (0, 1]. A factor of 1 returns a copy.
pub fn scale_image(img: &DynamicImage, factor: f64) -> PipelineResult<DynamicImage> {
    let (src_w, src_h) = (img.width(), img.height());
    if !(factor > 0.0 && factor <= 1.0) {
        return Err(ConvertError::resize_failed(
            (src_w, src_h),
            (src_w, src_h),
            format!("scale factor {factor} outside (0, 1]"),
        ));
    }
    let (w, h) = calc_scaled_dimensions(src_w, src_h, factor);
    if (w, h) == (src_w, src_h) {
        return Ok(img.clone());
    }
    Ok(lanczos_resize(img.clone(), w, h)?)
}

/// Interleaved 8-bit buffer handed to the resizer.
struct PixelBuf {
    width: u32,
    height: u32,
    channels: Channels,
    data: Vec<u8>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Channels {
    Rgb,
    Rgba,
}

impl Channels {
    fn pixel_type(self) -> PixelType {
        match self {
            Channels::Rgb => PixelType::U8x3,
            Channels::Rgba => PixelType::U8x4,
        }
    }

    fn wrap(self, width: u32, height: u32, data: Vec<u8>) -> Option<DynamicImage> {
        match self {
            Channels::Rgb => RgbImage::from_raw(width, height, data).map(DynamicImage::ImageRgb8),
            Channels::Rgba => {
                RgbaImage::from_raw(width, height, data).map(DynamicImage::ImageRgba8)
            }
        }
    }
}

impl PixelBuf {
    /// Takes ownership of RGB8/RGBA8 buffers; other layouts are converted.
    fn from_image(img: DynamicImage) -> Self {
        let (width, height) = (img.width(), img.height());
        let (channels, data) = match img {
            DynamicImage::ImageRgb8(buf) => (Channels::Rgb, buf.into_raw()),
            DynamicImage::ImageRgba8(buf) => (Channels::Rgba, buf.into_raw()),
            other if other.color().has_alpha() => (Channels::Rgba, other.to_rgba8().into_raw()),
            other => (Channels::Rgb, other.to_rgb8().into_raw()),
        };
        Self {
            width,
            height,
            channels,
            data,
        }
    }

    fn expected_len(&self) -> Option<usize> {
        (self.width as usize)
            .checked_mul(self.height as usize)?
            .checked_mul(self.channels.pixel_type().size())
    }

    fn lanczos(&mut self, dst_w: u32, dst_h: u32) -> Result<DynamicImage, String> {
        let pixel_type = self.channels.pixel_type();
        let len = self
            .expected_len()
            .ok_or_else(|| format!("{}x{} overflows a pixel buffer", self.width, self.height))?;
        if self.data.len() < len {
            return Err(format!("pixel buffer holds {} of {len} bytes", self.data.len()));
        }

        let (width, height) = (self.width, self.height);
        let out = match fir::images::Image::from_slice_u8(
            width,
            height,
            &mut self.data[..len],
            pixel_type,
        ) {
            Ok(view) => run_fir(&view, pixel_type, (width, height), dst_w, dst_h),
            Err(ImageBufferError::InvalidBufferAlignment) => {
                let mut copy = fir::images::Image::new(width, height, pixel_type);
                copy.buffer_mut().copy_from_slice(&self.data[..len]);
                run_fir(&copy, pixel_type, (width, height), dst_w, dst_h)
            }
            Err(e) => Err(format!("cannot view pixels: {e:?}")),
        }?;
        self.channels
            .wrap(dst_w, dst_h, out)
            .ok_or_else(|| "resized buffer does not match its dimensions".to_string())
    }

    fn lanczos_slow(&self, dst_w: u32, dst_h: u32) -> Result<DynamicImage, String> {
        let img = self
            .channels
            .wrap(self.width, self.height, self.data.clone())
            .ok_or_else(|| "pixel buffer does not match its dimensions".to_string())?;
        Ok(img.resize_exact(dst_w, dst_h, FilterType::Lanczos3))
    }
}

/// Resamples `src` without modifying it; alpha is premultiplied into a
/// scratch image so the source stays usable for the fallback path.
fn run_fir(
    src: &fir::images::Image<'_>,
    pixel_type: PixelType,
    (src_w, src_h): (u32, u32),
    dst_w: u32,
    dst_h: u32,
) -> Result<Vec<u8>, String> {
    let mut dst = fir::images::Image::new(dst_w, dst_h, pixel_type);
    let options =
        ResizeOptions::new().resize_alg(fir::ResizeAlg::Convolution(fir::FilterType::Lanczos3));
    let mut resizer = fir::Resizer::new();

    if pixel_type != PixelType::U8x4 {
        resizer
            .resize(src, &mut dst, &options)
            .map_err(|e| format!("lanczos3: {e:?}"))?;
        return Ok(dst.into_vec());
    }

    // Transparent pixels must not bleed colour into opaque neighbours
    let mul_div = MulDiv::default();
    let mut premultiplied = fir::images::Image::new(src_w, src_h, pixel_type);
    mul_div
        .multiply_alpha(src, &mut premultiplied)
        .map_err(|e| format!("premultiply: {e}"))?;
    resizer
        .resize(&premultiplied, &mut dst, &options)
        .map_err(|e| format!("lanczos3: {e:?}"))?;
    mul_div
        .divide_alpha_inplace(&mut dst)
        .map_err(|e| format!("unpremultiply: {e}"))?;
    Ok(dst.into_vec())
}

/// Lanczos3 resize of an owned image. RGB8/RGBA8 input is resized in place
/// without copying; everything else is widened first.
pub fn lanczos_resize(
    img: DynamicImage,
    dst_width: u32,
    dst_height: u32,
) -> std::result::Result<DynamicImage, ResizeError> {
    let source = (img.width(), img.height());
    let target = (dst_width, dst_height);
    if source.0 == 0 || source.1 == 0 || dst_width == 0 || dst_height == 0 {
        return Err(ResizeError::new(source, target, "zero-sized resize"));
    }

    let mut buf = PixelBuf::from_image(img);
    buf.lanczos(dst_width, dst_height).or_else(|simd_err| {
        debug!(error = %simd_err, "fast_image_resize failed, retrying with image::imageops");
        buf
            .lanczos_slow(dst_width, dst_height)
            .map_err(|slow_err| {
                ResizeError::new(source, target, format!("{simd_err}; retry: {slow_err}"))
            })
    })
}
