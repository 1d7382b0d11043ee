// src/client/blob.rs
//
// In-memory stand-in for browser object URLs. Converted outputs are
// registered here and addressed by `blob:imgconv/<uuid>` handles until revoked.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::ops::{ConversionResult, OutputFormat};

const HANDLE_PREFIX: &str = "blob:imgconv/";

/// Download handle for one converted file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResultHandle {
    url: String,
    /// Name offered for download, e.g. `holiday.webp`
    pub download_name: String,
    pub format: OutputFormat,
    pub size_bytes: usize,
}

impl ResultHandle {
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl fmt::Display for ResultHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

#[derive(Debug, Clone)]
pub struct StoredBlob {
    pub bytes: Arc<[u8]>,
    pub content_type: &'static str,
}

/// Shared registry of live result handles. Cloning shares the registry.
#[derive(Debug, Clone, Default)]
pub struct BlobStore {
    blobs: Arc<Mutex<HashMap<String, StoredBlob>>>,
}

impl BlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a converted output and hand back its handle.
    pub fn register(&self, source_name: &str, result: ConversionResult) -> ResultHandle {
        let url = format!("{HANDLE_PREFIX}{}", Uuid::new_v4());
        let handle = ResultHandle {
            url: url.clone(),
            download_name: download_name(source_name, result.format),
            format: result.format,
            size_bytes: result.bytes.len(),
        };
        let blob = StoredBlob {
            content_type: result.content_type(),
            bytes: Arc::from(result.bytes),
        };
        self.blobs.lock().insert(url, blob);
        debug!(handle = %handle, size = handle.size_bytes, "registered result");
        handle
    }

    pub fn get(&self, handle: &ResultHandle) -> Option<StoredBlob> {
        self.blobs.lock().get(&handle.url).cloned()
    }

    pub fn contains(&self, handle: &ResultHandle) -> bool {
        self.blobs.lock().contains_key(&handle.url)
    }

    /// Release a handle. Returns false if it was already gone.
    pub fn revoke(&self, handle: &ResultHandle) -> bool {
        let removed = self.blobs.lock().remove(&handle.url).is_some();
        if removed {
            debug!(handle = %handle, "revoked result");
        }
        removed
    }

    pub fn revoke_all<'a>(&self, handles: impl IntoIterator<Item = &'a ResultHandle>) -> usize {
        let mut blobs = self.blobs.lock();
        handles
            .into_iter()
            .filter(|h| blobs.remove(&h.url).is_some())
            .count()
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.lock().is_empty()
    }
}

/// `photo.HEIC` converted to webp downloads as `photo.webp`.
fn download_name(source_name: &str, format: OutputFormat) -> String {
    let stem = match source_name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => source_name,
    };
    let stem = if stem.is_empty() { "converted" } else { stem };
    format!("{stem}.{}", format.as_str())
}
