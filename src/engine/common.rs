// src/engine/common.rs
//
// Common utilities shared across engine modules.
// Panic containment for the FFI codecs and the engine Result alias.

use crate::error::ConvertError;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::error;

/// Result type used throughout the engine.
pub type EngineResult<T> = std::result::Result<T, ConvertError>;

/// Run a codec call, turning an unwinding panic into `InternalPanic`.
///
/// mozjpeg reports libjpeg errors by panicking, and the other bindings may
/// assert on malformed input. A panic must never take the worker thread down
/// with it, so every FFI entry point goes through here with a short `label`
/// such as `"encode:jpeg"`.
pub fn run_with_panic_policy<T, F>(label: &'static str, f: F) -> EngineResult<T>
where
    F: FnOnce() -> EngineResult<T>,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(stage = label, panic = %message, "codec panicked");
            Err(ConvertError::internal_panic(format!("{label}: {message}")))
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
