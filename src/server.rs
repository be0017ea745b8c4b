//! HTTP API.
//!
//! The transport boundary around the diagnosis pipeline: it parses a
//! validated `(crop, image bytes)` pair out of a multipart form and maps
//! pipeline failures to a JSON error envelope. All diagnosis logic lives
//! in [`crate::pipeline`].
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/predict` | Diagnose a leaf photo (`crop` text field, `file` binary field) |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "unknown_crop", "message": "unknown crop: 'potato' is not configured" } }
//! ```
//!
//! Request validation failures (`unknown_crop`, `decode_error`,
//! `bad_request`) return 400; dependency failures (`model_load_error`,
//! `index_unavailable`, `generation_error`) return 500.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so browser-based field
//! tools can call the API directly.

use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;

use crate::config::Config;
use crate::pipeline::DiagnosisPipeline;

/// Shared application state passed to route handlers.
#[derive(Clone)]
struct AppState {
    pipeline: Arc<DiagnosisPipeline>,
}

/// Start the HTTP server on the configured bind address.
///
/// Runs until the process is terminated.
pub async fn run_server(config: &Config, pipeline: Arc<DiagnosisPipeline>) -> anyhow::Result<()> {
    let state = AppState { pipeline };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/api/predict", post(handle_predict))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    println!("Crop Clinic listening on http://{}", config.server.bind);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"unknown_crop"`).
    code: String,
    /// Human-readable error message.
    message: String,
}

/// Internal error type that converts into an HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

impl From<crate::error::DiagnosisError> for AppError {
    fn from(err: crate::error::DiagnosisError) -> Self {
        let status = if err.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            warn!(stage = err.stage(), error = %err, "diagnosis failed");
            StatusCode::INTERNAL_SERVER_ERROR
        };
        AppError {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

// ============ Handlers ============

/// `POST /api/predict` — multipart form with a `crop` text field and a
/// `file` binary field.
async fn handle_predict(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<crate::pipeline::Diagnosis>, AppError> {
    let mut crop: Option<String> = None;
    let mut image: Option<Vec<u8>> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("invalid multipart body: {}", e)))?
    {
        match field.name() {
            Some("crop") => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| bad_request(format!("invalid crop field: {}", e)))?;
                crop = Some(value);
            }
            Some("file") => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| bad_request(format!("invalid file field: {}", e)))?;
                image = Some(bytes.to_vec());
            }
            _ => {}
        }
    }

    let crop = crop.ok_or_else(|| bad_request("missing required field: crop"))?;
    let image = image.ok_or_else(|| bad_request("missing required field: file"))?;

    let diagnosis = state.pipeline.diagnose(&crop, &image).await?;
    Ok(Json(diagnosis))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// `GET /health`
async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DiagnosisError;

    #[test]
    fn test_client_errors_map_to_400() {
        let err: AppError = DiagnosisError::UnknownCrop("potato".into()).into();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.code, "unknown_crop");

        let err: AppError = DiagnosisError::Decode("bad bytes".into()).into();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.code, "decode_error");
    }

    #[test]
    fn test_dependency_errors_map_to_500() {
        let err: AppError = DiagnosisError::IndexUnavailable("down".into()).into();
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.code, "index_unavailable");

        let err: AppError = DiagnosisError::Generation("timeout".into()).into();
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.code, "generation_error");

        let err: AppError = DiagnosisError::ModelLoad {
            crop: "Wheat".into(),
            message: "missing".into(),
        }
        .into();
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.code, "model_load_error");
    }
}
