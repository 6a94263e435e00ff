use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::application::render::{RenderError, RenderRequest};

use super::HttpState;
use super::error::{ApiError, codes};

#[derive(Debug, Serialize, Deserialize)]
pub struct GeneratePdfRequest {
    pub html: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GeneratePdfResponse {
    /// Base64-encoded PDF document.
    pub pdf: String,
}

pub async fn generate_pdf(
    State(state): State<HttpState>,
    payload: Result<Json<GeneratePdfRequest>, JsonRejection>,
) -> Result<Json<GeneratePdfResponse>, ApiError> {
    let Json(payload) = payload.map_err(|rejection| {
        ApiError::new(
            rejection.status(),
            codes::BAD_REQUEST,
            "Invalid request body",
            Some(rejection.body_text()),
        )
    })?;

    // Detached so a dropped connection cannot interrupt the pipeline before
    // the engine has been torn down.
    let renderer = state.renderer.clone();
    let request = RenderRequest::new(payload.html);
    let artifact = tokio::spawn(async move { renderer.convert(&request).await })
        .await
        .map_err(|err| RenderError::aborted(err.to_string()))??;

    Ok(Json(GeneratePdfResponse {
        pdf: artifact.into_encoded(),
    }))
}

pub async fn health() -> StatusCode {
    StatusCode::NO_CONTENT
}
