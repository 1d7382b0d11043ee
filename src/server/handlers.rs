// src/server/handlers.rs
//
// Route handlers. Conversion runs on a blocking worker under the same
// wall-clock budget the engine enforces between stages.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{multipart::MultipartRejection, Multipart, State},
    http::{header, HeaderValue, StatusCode},
    response::Response,
    Json,
};
use serde_json::{json, Value};
use tracing::{error, info};
use uuid::Uuid;

use crate::engine::ConvertTask;
use crate::error::ConvertError;
use crate::ops::{ConversionRequest, ConversionResult};
use crate::server::errors::{from_multipart_rejection, AppError, AppResult};
use crate::server::form::ConvertForm;
use crate::server::AppState;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": crate::version(),
        "heic": crate::engine::libheif_available(),
    }))
}

pub async fn convert(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> AppResult<Response> {
    let request_id = Uuid::new_v4();

    let form = match multipart {
        Ok(multipart) => ConvertForm::read(multipart, state.limits.max_upload_bytes).await,
        Err(rejection) => Err(from_multipart_rejection(rejection)),
    };
    let request = form
        .and_then(ConvertForm::into_request)
        .inspect_err(|err| {
            info!(%request_id, error = %err, "rejected convert request");
        })?;

    let filename = request.source_filename.clone();
    let format = request.output_format;
    let quality = request.quality;
    let target_kb = request.target_size_kb;

    match run_blocking(state, request, request_id).await {
        Ok(result) => build_response(result, request_id),
        Err(err) => {
            error!(
                %request_id,
                %filename,
                %format,
                quality,
                target_kb = target_kb.unwrap_or(0.0),
                category = err.category().as_str(),
                error = %err,
                "conversion failed"
            );
            Err(err.into())
        }
    }
}

async fn run_blocking(
    state: Arc<AppState>,
    request: ConversionRequest,
    request_id: Uuid,
) -> Result<ConversionResult, ConvertError> {
    let budget = state.limits.timeout();
    let limit_ms = state.limits.timeout_ms;

    let job = tokio::task::spawn_blocking(move || {
        ConvertTask::new(request, &state.limits, &state.search)
            .with_request_id(request_id)
            .run()
    });

    match tokio::time::timeout(budget, job).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(ConvertError::internal_panic(format!(
            "conversion worker failed: {join_err}"
        ))),
        // The worker notices its own deadline at the next stage boundary
        Err(_) => Err(ConvertError::timeout("request", limit_ms)),
    }
}

fn build_response(result: ConversionResult, request_id: Uuid) -> AppResult<Response> {
    let disposition = format!("attachment; filename=\"{}\"", result.suggested_filename());
    let request_id = HeaderValue::from_str(&request_id.to_string())
        .map_err(|e| AppError::internal(format!("invalid request id header: {e}")))?;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, result.content_type())
        .header(header::CONTENT_DISPOSITION, disposition)
        .header(header::CONTENT_LENGTH, result.bytes.len())
        .header(REQUEST_ID_HEADER, request_id)
        .body(Body::from(result.bytes))
        .map_err(|e| AppError::internal(format!("failed to build response: {e}")))
}
