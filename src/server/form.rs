// Multipart form parsing for POST /api/convert.

use axum::extract::multipart::{Field, Multipart, MultipartError};

use crate::error::ConvertError;
use crate::ops::{clamp_quality, ConversionRequest, OutputFormat, DEFAULT_QUALITY};
use crate::server::errors::from_multipart;

/// Raw form fields, before validation.
#[derive(Debug, Default)]
pub struct ConvertForm {
    pub file: Option<Vec<u8>>,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub format: Option<String>,
    pub quality: Option<String>,
    pub width: Option<String>,
    pub height: Option<String>,
    pub target_file_size: Option<String>,
}

impl ConvertForm {
    /// Drain the multipart stream. The file is read chunk by chunk and the
    /// upload cap is enforced as soon as it is crossed.
    pub async fn read(mut multipart: Multipart, max_upload_bytes: u64) -> Result<Self, ConvertError> {
        let mut form = Self::default();
        let mp_err = |e: MultipartError| from_multipart(e, max_upload_bytes);

        while let Some(field) = multipart.next_field().await.map_err(mp_err)? {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "file" => {
                    form.filename = field.file_name().map(str::to_string);
                    form.content_type = field.content_type().map(str::to_string);
                    form.file = Some(read_file(field, max_upload_bytes).await?);
                }
                "format" => form.format = Some(field.text().await.map_err(mp_err)?),
                "quality" => form.quality = Some(field.text().await.map_err(mp_err)?),
                "width" => form.width = Some(field.text().await.map_err(mp_err)?),
                "height" => form.height = Some(field.text().await.map_err(mp_err)?),
                "targetFileSize" => {
                    form.target_file_size = Some(field.text().await.map_err(mp_err)?)
                }
                _ => {}
            }
        }
        Ok(form)
    }

    /// Validate the fields and build the engine request.
    pub fn into_request(self) -> Result<ConversionRequest, ConvertError> {
        let (file, format) = match (self.file, self.format) {
            (Some(file), Some(format)) if !file.is_empty() && !format.trim().is_empty() => {
                (file, format)
            }
            _ => return Err(ConvertError::missing_input()),
        };
        let output_format: OutputFormat = format.parse()?;

        let quality = parse_int("quality", self.quality.as_deref())?
            .map(clamp_quality)
            .unwrap_or(DEFAULT_QUALITY);
        let width = parse_dimension("width", self.width.as_deref())?;
        let height = parse_dimension("height", self.height.as_deref())?;
        let target_kb = parse_float("targetFileSize", self.target_file_size.as_deref())?
            .unwrap_or(0.0);

        let mut request = ConversionRequest::new(file, output_format)
            .with_quality(quality as i64)
            .with_resize(width, height)
            .with_target_size_kb(target_kb);
        if let Some(filename) = self.filename {
            request = request.with_filename(filename);
        }
        if let Some(content_type) = self.content_type {
            request = request.with_content_type(content_type);
        }
        Ok(request)
    }
}

async fn read_file(mut field: Field<'_>, max_upload_bytes: u64) -> Result<Vec<u8>, ConvertError> {
    let mut buf = Vec::new();
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| from_multipart(e, max_upload_bytes))?
    {
        let seen = buf.len() as u64 + chunk.len() as u64;
        if seen > max_upload_bytes {
            return Err(ConvertError::file_too_large(seen, max_upload_bytes));
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf)
}

/// Blank means "not sent".
fn non_blank(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim).filter(|s| !s.is_empty())
}

fn parse_int(name: &'static str, raw: Option<&str>) -> Result<Option<i64>, ConvertError> {
    let Some(value) = non_blank(raw) else {
        return Ok(None);
    };
    // Browsers occasionally send "80.0" for number inputs
    match value.parse::<i64>() {
        Ok(n) => Ok(Some(n)),
        Err(_) => match value.parse::<f64>() {
            Ok(f) if f.is_finite() => Ok(Some(f.round() as i64)),
            _ => Err(ConvertError::invalid_argument(
                name,
                value.to_string(),
                "expected a number",
            )),
        },
    }
}

/// Negative sizes are treated as 0 ("auto").
fn parse_dimension(name: &'static str, raw: Option<&str>) -> Result<u32, ConvertError> {
    Ok(parse_int(name, raw)?
        .map(|n| n.clamp(0, u32::MAX as i64) as u32)
        .unwrap_or(0))
}

fn parse_float(name: &'static str, raw: Option<&str>) -> Result<Option<f64>, ConvertError> {
    let Some(value) = non_blank(raw) else {
        return Ok(None);
    };
    match value.parse::<f64>() {
        Ok(f) if f.is_finite() => Ok(Some(f.max(0.0))),
        _ => Err(ConvertError::invalid_argument(
            name,
            value.to_string(),
            "expected a number",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::{EncodeStrategy, ResizeBox};

    fn form(format: &str) -> ConvertForm {
        ConvertForm {
            file: Some(vec![1, 2, 3]),
            filename: Some("a.png".into()),
            format: Some(format.into()),
            ..ConvertForm::default()
        }
    }

    #[test]
    fn missing_file_or_format() {
        let no_file = ConvertForm {
            format: Some("png".into()),
            ..ConvertForm::default()
        };
        assert!(matches!(no_file.into_request(), Err(ConvertError::MissingInput)));

        let no_format = ConvertForm {
            file: Some(vec![1]),
            ..ConvertForm::default()
        };
        assert!(matches!(no_format.into_request(), Err(ConvertError::MissingInput)));

        let blank = form("   ");
        assert!(matches!(blank.into_request(), Err(ConvertError::MissingInput)));
    }

    #[test]
    fn defaults_and_normalisation() {
        let req = form("JPEG").into_request().unwrap();
        assert_eq!(req.output_format, OutputFormat::Jpg);
        assert_eq!(req.quality, 80);
        assert_eq!(req.resize, ResizeBox::default());
        assert_eq!(req.strategy(), EncodeStrategy::Quality(80));
    }

    #[test]
    fn numeric_fields() {
        let mut f = form("webp");
        f.quality = Some("250".into());
        f.width = Some("-5".into());
        f.height = Some("600".into());
        f.target_file_size = Some("150.5".into());
        let req = f.into_request().unwrap();
        assert_eq!(req.quality, 100);
        assert_eq!(req.resize, ResizeBox::new(0, 600));
        assert_eq!(
            req.strategy(),
            EncodeStrategy::TargetSize {
                kb: 150.5,
                quality: 100
            }
        );
    }

    #[test]
    fn malformed_numbers_are_validation_errors() {
        let mut f = form("png");
        f.quality = Some("high".into());
        assert!(matches!(
            f.into_request(),
            Err(ConvertError::InvalidArgument { .. })
        ));

        let mut f = form("png");
        f.target_file_size = Some("lots".into());
        assert!(matches!(
            f.into_request(),
            Err(ConvertError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn zero_or_negative_target_disables_search() {
        for raw in ["0", "-10", ""] {
            let mut f = form("jpg");
            f.target_file_size = Some(raw.into());
            let req = f.into_request().unwrap();
            assert_eq!(req.strategy(), EncodeStrategy::Quality(80));
        }
    }

    #[test]
    fn bad_format_is_rejected() {
        assert!(matches!(
            form("gif").into_request(),
            Err(ConvertError::InvalidFormat { .. })
        ));
    }
}
