// src/client.rs
//
// Client-side batch orchestration. Files are converted one at a time through
// a `ConvertBackend`; each success is registered as a revocable result handle.

pub mod backend;
pub mod batch;
pub mod blob;

pub use backend::{ConvertBackend, ConvertOptions, HttpBackend, InputFile, LocalBackend};
pub use batch::{BatchOrchestrator, BatchProgress, BatchState, BatchSummary, FileOutcome};
pub use blob::{BlobStore, ResultHandle, StoredBlob};
