// src/client/backend.rs
//
// Conversion backends for the batch orchestrator: the engine in-process, or
// the HTTP service over multipart.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use crate::engine::limits::DEFAULT_MAX_UPLOAD_BYTES;
use crate::engine::{ConvertTask, Limits, SearchConfig};
use crate::error::ConvertError;
use crate::ops::{
    extension_of, ConversionRequest, ConversionResult, OutputFormat, ResizeBox, DEFAULT_QUALITY,
};

const X_REQUEST_ID: &str = "X-Request-ID";

/// Content types the upload control accepts.
const ACCEPTED_CONTENT_TYPES: &[&str] = &[
    "image/jpeg",
    "image/jpg",
    "image/png",
    "image/webp",
    "image/heic",
    "image/heif",
    "image/tiff",
    "image/gif",
    "image/bmp",
];

/// A file queued for conversion. Never mutated after it is enqueued.
#[derive(Debug, Clone)]
pub struct InputFile {
    pub name: String,
    pub content_type: Option<String>,
    pub bytes: Arc<[u8]>,
}

impl InputFile {
    pub fn new(name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            name: name.into(),
            content_type: None,
            bytes: bytes.into(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn read(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        Ok(Self::new(name, bytes))
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Upload-control acceptance: declared type or extension must be one of
    /// the supported inputs, and the file must fit the upload cap.
    pub fn check_acceptable(&self, max_bytes: u64) -> Result<(), ConvertError> {
        let type_ok = self
            .content_type
            .as_deref()
            .map(|ct| {
                let ct = ct.trim().to_ascii_lowercase();
                ACCEPTED_CONTENT_TYPES.contains(&ct.as_str())
            })
            .unwrap_or(false);
        let ext_ok = extension_of(&self.name)
            .map(|ext| crate::supported_input_formats().contains(&ext.as_str()))
            .unwrap_or(false);

        if !type_ok && !ext_ok {
            let kind = self
                .content_type
                .clone()
                .unwrap_or_else(|| self.name.clone());
            return Err(ConvertError::unsupported_input_type(kind));
        }
        if self.len() as u64 > max_bytes {
            return Err(ConvertError::file_too_large(self.len() as u64, max_bytes));
        }
        Ok(())
    }
}

/// Settings shared by every file in a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvertOptions {
    pub format: OutputFormat,
    pub quality: u8,
    pub resize: ResizeBox,
    pub target_size_kb: Option<f64>,
    pub max_upload_bytes: u64,
}

impl ConvertOptions {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            quality: DEFAULT_QUALITY,
            resize: ResizeBox::default(),
            target_size_kb: None,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }

    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality.clamp(1, 100);
        self
    }

    pub fn with_resize(mut self, width: u32, height: u32) -> Self {
        self.resize = ResizeBox::new(width, height);
        self
    }

    pub fn with_target_size_kb(mut self, kb: f64) -> Self {
        self.target_size_kb = (kb.is_finite() && kb > 0.0).then_some(kb);
        self
    }

    pub fn with_max_upload_bytes(mut self, bytes: u64) -> Self {
        self.max_upload_bytes = bytes;
        self
    }

    pub fn to_request(&self, file: &InputFile) -> ConversionRequest {
        let mut request = ConversionRequest::new(file.bytes.to_vec(), self.format)
            .with_filename(file.name.clone())
            .with_quality(self.quality as i64)
            .with_resize(self.resize.width, self.resize.height);
        if let Some(kb) = self.target_size_kb {
            request = request.with_target_size_kb(kb);
        }
        if let Some(ct) = &file.content_type {
            request = request.with_content_type(ct.clone());
        }
        request
    }
}

/// Something that can convert one file.
pub trait ConvertBackend {
    fn convert(
        &self,
        file: &InputFile,
        options: &ConvertOptions,
    ) -> impl Future<Output = Result<ConversionResult, ConvertError>> + Send;
}

/// Runs the engine in-process on a blocking thread.
#[derive(Debug, Clone, Default)]
pub struct LocalBackend {
    limits: Arc<Limits>,
    search: Arc<SearchConfig>,
}

impl LocalBackend {
    pub fn new(limits: Limits, search: SearchConfig) -> Self {
        Self {
            limits: Arc::new(limits),
            search: Arc::new(search),
        }
    }
}

impl ConvertBackend for LocalBackend {
    async fn convert(
        &self,
        file: &InputFile,
        options: &ConvertOptions,
    ) -> Result<ConversionResult, ConvertError> {
        let request = options.to_request(file);
        let limits = Arc::clone(&self.limits);
        let search = Arc::clone(&self.search);

        tokio::task::spawn_blocking(move || ConvertTask::new(request, &limits, &search).run())
            .await
            .map_err(|e| ConvertError::internal_panic(format!("conversion worker failed: {e}")))?
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    #[serde(default)]
    details: Option<String>,
}

/// Talks to a running `imgconv-server`.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    endpoint: String,
}

impl HttpBackend {
    /// Slightly above the server's own budget so its 504 arrives first.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(35);

    pub fn new(base_url: &str) -> Result<Self, ConvertError> {
        Self::with_timeout(base_url, Self::DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, ConvertError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("imgconv/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ConvertError::transport(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: format!("{}/api/convert", base_url.trim_end_matches('/')),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn form(file: &InputFile, options: &ConvertOptions) -> Result<Form, ConvertError> {
        let mut part = Part::bytes(file.bytes.to_vec()).file_name(file.name.clone());
        if let Some(ct) = &file.content_type {
            part = part.mime_str(ct).map_err(|e| {
                ConvertError::invalid_argument("content_type", ct.clone(), e.to_string())
            })?;
        }

        let mut form = Form::new()
            .part("file", part)
            .text("format", options.format.as_str())
            .text("quality", options.quality.to_string());
        if options.resize.is_active() {
            form = form
                .text("width", options.resize.width.to_string())
                .text("height", options.resize.height.to_string());
        }
        if let Some(kb) = options.target_size_kb {
            form = form.text("targetFileSize", kb.to_string());
        }
        Ok(form)
    }
}

impl ConvertBackend for HttpBackend {
    async fn convert(
        &self,
        file: &InputFile,
        options: &ConvertOptions,
    ) -> Result<ConversionResult, ConvertError> {
        let request_id = Uuid::new_v4();
        let form = Self::form(file, options)?;
        debug!(%request_id, endpoint = %self.endpoint, file = %file.name, "posting conversion");

        let response = self
            .client
            .post(&self.endpoint)
            .header(X_REQUEST_ID, request_id.to_string())
            .multipart(form)
            .send()
            .await
            .map_err(|e| ConvertError::transport(e.to_string()))?;

        let status = response.status();
        let format = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(format_from_content_type)
            .unwrap_or(options.format);
        let body = response
            .bytes()
            .await
            .map_err(|e| ConvertError::transport(e.to_string()))?;

        if status.is_success() {
            return Ok(ConversionResult {
                bytes: body.to_vec(),
                format,
            });
        }

        match serde_json::from_slice::<ErrorBody>(&body) {
            Ok(err) => Err(ConvertError::remote(status.as_u16(), err.error, err.details)),
            Err(_) => Err(ConvertError::remote(
                status.as_u16(),
                status
                    .canonical_reason()
                    .unwrap_or("unexpected response")
                    .to_string(),
                None,
            )),
        }
    }
}

fn format_from_content_type(content_type: &str) -> Option<OutputFormat> {
    match content_type.split(';').next()?.trim() {
        "image/jpeg" => Some(OutputFormat::Jpg),
        "image/png" => Some(OutputFormat::Png),
        "image/webp" => Some(OutputFormat::WebP),
        _ => None,
    }
}
