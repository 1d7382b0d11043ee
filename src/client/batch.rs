// src/client/batch.rs
//
// Sequential batch loop: one conversion in flight, per-file failures recorded
// and skipped over, result handles released when the batch is replaced.

use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::client::backend::{ConvertBackend, ConvertOptions, InputFile};
use crate::client::blob::{BlobStore, ResultHandle};
use crate::error::ConvertError;

/// Per-file result.
#[derive(Debug, Clone)]
pub enum FileOutcome {
    Converted(ResultHandle),
    Failed(ConvertError),
}

impl FileOutcome {
    pub fn is_converted(&self) -> bool {
        matches!(self, FileOutcome::Converted(_))
    }

    pub fn handle(&self) -> Option<&ResultHandle> {
        match self {
            FileOutcome::Converted(handle) => Some(handle),
            FileOutcome::Failed(_) => None,
        }
    }

    pub fn error(&self) -> Option<&ConvertError> {
        match self {
            FileOutcome::Converted(_) => None,
            FileOutcome::Failed(err) => Some(err),
        }
    }
}

/// Snapshot handed to the progress observer after each file.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchProgress {
    pub completed: usize,
    pub total: usize,
    pub file_name: String,
    pub succeeded: bool,
}

impl BatchProgress {
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        self.completed as f64 / self.total as f64
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BatchSummary {
    /// Every file converted
    Complete { converted: usize },
    /// Some files converted; `warning` names the ones that did not
    Partial {
        converted: usize,
        failed: usize,
        warning: String,
    },
    /// Nothing converted
    Failed { message: String },
}

/// Files of the current batch and their outcomes, index-aligned.
#[derive(Debug, Clone, Default)]
pub struct BatchState {
    files: Vec<InputFile>,
    outcomes: Vec<FileOutcome>,
}

impl BatchState {
    pub fn files(&self) -> &[InputFile] {
        &self.files
    }

    pub fn outcomes(&self) -> &[FileOutcome] {
        &self.outcomes
    }

    /// Fraction of files processed, in `[0, 1]`.
    pub fn progress(&self) -> f64 {
        if self.files.is_empty() {
            return 0.0;
        }
        self.outcomes.len() as f64 / self.files.len() as f64
    }

    pub fn is_finished(&self) -> bool {
        !self.files.is_empty() && self.outcomes.len() == self.files.len()
    }

    pub fn handles(&self) -> impl Iterator<Item = &ResultHandle> {
        self.outcomes.iter().filter_map(FileOutcome::handle)
    }

    pub fn failures(&self) -> impl Iterator<Item = (&InputFile, &ConvertError)> {
        self.files
            .iter()
            .zip(&self.outcomes)
            .filter_map(|(file, outcome)| outcome.error().map(|err| (file, err)))
    }

    fn summarize(&self) -> BatchSummary {
        let total = self.files.len();
        if total == 0 {
            return BatchSummary::Failed {
                message: "No files to convert".to_string(),
            };
        }
        let failed: Vec<_> = self.failures().collect();
        let converted = total - failed.len();

        if failed.is_empty() {
            BatchSummary::Complete { converted }
        } else if converted > 0 {
            let names: Vec<&str> = failed.iter().map(|(f, _)| f.name.as_str()).collect();
            BatchSummary::Partial {
                converted,
                failed: failed.len(),
                warning: format!(
                    "{} of {total} files failed to convert: {}",
                    failed.len(),
                    names.join(", ")
                ),
            }
        } else {
            let reasons: Vec<String> = failed
                .iter()
                .map(|(f, err)| format!("{} ({})", f.name, err.summary()))
                .collect();
            BatchSummary::Failed {
                message: format!("All {total} files failed to convert: {}", reasons.join(", ")),
            }
        }
    }
}

type ProgressObserver = Box<dyn FnMut(&BatchProgress) + Send>;

/// Drives a batch through a backend, one file at a time.
pub struct BatchOrchestrator<B> {
    backend: B,
    store: BlobStore,
    state: BatchState,
    observer: Option<ProgressObserver>,
}

impl<B: ConvertBackend> BatchOrchestrator<B> {
    pub fn new(backend: B) -> Self {
        Self::with_store(backend, BlobStore::new())
    }

    pub fn with_store(backend: B, store: BlobStore) -> Self {
        Self {
            backend,
            store,
            state: BatchState::default(),
            observer: None,
        }
    }

    pub fn on_progress(mut self, observer: impl FnMut(&BatchProgress) + Send + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn state(&self) -> &BatchState {
        &self.state
    }

    pub fn store(&self) -> &BlobStore {
        &self.store
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Convert `files` in order. Handles from the previous batch are revoked
    /// before the first file is sent.
    pub async fn run(&mut self, files: Vec<InputFile>, options: &ConvertOptions) -> BatchSummary {
        self.release();
        self.state = BatchState {
            outcomes: Vec::with_capacity(files.len()),
            files,
        };

        let batch_id = Uuid::new_v4();
        let total = self.state.files.len();
        let span = info_span!("batch", %batch_id, total, format = %options.format);

        async {
            for index in 0..total {
                let file = &self.state.files[index];
                let name = file.name.clone();

                let converted = match file.check_acceptable(options.max_upload_bytes) {
                    Ok(()) => self.backend.convert(file, options).await,
                    Err(err) => Err(err),
                };
                let outcome = match converted {
                    Ok(result) => {
                        let handle = self.store.register(&name, result);
                        info!(index, file = %name, handle = %handle, "file converted");
                        FileOutcome::Converted(handle)
                    }
                    Err(err) => {
                        warn!(index, file = %name, error = %err, "file failed");
                        FileOutcome::Failed(err)
                    }
                };

                let progress = BatchProgress {
                    completed: index + 1,
                    total,
                    file_name: name,
                    succeeded: outcome.is_converted(),
                };
                self.state.outcomes.push(outcome);
                info!(progress = progress.fraction(), "batch progress");
                if let Some(observer) = self.observer.as_mut() {
                    observer(&progress);
                }
            }

            let summary = self.state.summarize();
            match &summary {
                BatchSummary::Complete { converted } => info!(converted, "batch complete"),
                BatchSummary::Partial { warning, .. } => warn!(%warning, "batch partially failed"),
                BatchSummary::Failed { message } => warn!(%message, "batch failed"),
            }
            summary
        }
        .instrument(span)
        .await
    }

    /// Revoke every handle of the current batch.
    pub fn release(&mut self) -> usize {
        release_handles(&self.store, &self.state)
    }
}

fn release_handles(store: &BlobStore, state: &BatchState) -> usize {
    let revoked = store.revoke_all(state.handles());
    if revoked > 0 {
        info!(revoked, "released batch results");
    }
    revoked
}

impl<B> Drop for BatchOrchestrator<B> {
    fn drop(&mut self) {
        release_handles(&self.store, &self.state);
    }
}
