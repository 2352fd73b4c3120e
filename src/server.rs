//! HTTP front end.
//!
//! | Method | Path            | Purpose                                   |
//! |--------|-----------------|-------------------------------------------|
//! | POST   | `/api/generate` | `{"prompt": ...}` → [`SongResult`] JSON   |
//! | GET    | `/api/download` | the last `final_song.wav`                 |
//! | GET    | anything else   | static frontend, SPA fallback to index    |
//!
//! Errors are JSON `{"error": ...}` bodies.

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use crate::Error;
use crate::config::OutputDirs;
use crate::manager::SongManager;
use crate::pipeline::SongResult;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    /// `None` when the pipeline failed to initialise; generation then
    /// answers 500 while downloads and static files keep working.
    pub manager: Option<SongManager>,
    pub dirs: OutputDirs,
    pub static_dir: PathBuf,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        let status = match &error {
            Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Error::Busy(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, error.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(rejection.status(), rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            error: self.message,
        });
        (self.status, body).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct GenerateRequest {
    prompt: String,
}

async fn generate(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<Json<SongResult>, ApiError> {
    let Json(request) = payload?;
    if request.prompt.trim().is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "prompt must not be empty"));
    }
    let manager = state.manager.as_ref().ok_or_else(|| {
        tracing::error!("generation requested but the generator is unavailable");
        ApiError::internal("generator unavailable")
    })?;

    tracing::info!(prompt_chars = request.prompt.len(), "generation requested");
    match manager.generate(request.prompt).await {
        Ok(song) => Ok(Json(song)),
        Err(error) => {
            tracing::error!(%error, "generation request failed");
            Err(error.into())
        }
    }
}

async fn download(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let path = state.dirs.final_song_path();
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::not_found("Song not found"));
        }
        Err(error) => {
            tracing::error!(%error, path = %path.display(), "reading final song failed");
            return Err(ApiError::internal(format!("could not read song: {error}")));
        }
    };
    let disposition = format!("attachment; filename=\"{}\"", OutputDirs::FINAL_SONG_FILE);
    Ok((
        [
            (header::CONTENT_TYPE, "audio/wav".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let index = state.static_dir.join("index.html");
    let static_files = ServeDir::new(&state.static_dir).fallback(ServeFile::new(index));
    Router::new()
        .route("/api/generate", post(generate))
        .route("/api/download", get(download))
        .fallback_service(static_files)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}
