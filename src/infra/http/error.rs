use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use crate::application::error::ErrorReport;
use crate::application::render::RenderError;

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiErrorBody {
    pub error: ApiErrorMessage,
}

pub mod codes {
    pub const BAD_REQUEST: &str = "bad_request";
    pub const ENGINE_UNAVAILABLE: &str = "engine_unavailable";
    pub const LOAD_FAILED: &str = "load_failed";
    pub const CAPTURE_FAILED: &str = "capture_failed";
    pub const RENDER_TIMEOUT: &str = "render_timeout";
    pub const INTERNAL: &str = "internal_error";
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiErrorMessage {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: &'static str,
    hint: Option<String>,
    detail: Option<String>,
}

impl ApiError {
    pub fn new(
        status: StatusCode,
        code: &'static str,
        message: &'static str,
        hint: Option<String>,
    ) -> Self {
        Self {
            status,
            code,
            message,
            hint,
            detail: None,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    /// Diagnostic kept out of the response body but reported to the logs.
    fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

impl From<RenderError> for ApiError {
    fn from(error: RenderError) -> Self {
        let api_error = match &error {
            RenderError::Launch { .. } => ApiError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                codes::ENGINE_UNAVAILABLE,
                "Rendering engine unavailable",
                None,
            ),
            RenderError::Load { .. } => ApiError::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                codes::LOAD_FAILED,
                "Document could not be loaded",
                None,
            ),
            RenderError::Capture { .. } => ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                codes::CAPTURE_FAILED,
                "PDF capture failed",
                None,
            ),
            RenderError::Timeout { stage, limit } => ApiError::new(
                StatusCode::GATEWAY_TIMEOUT,
                codes::RENDER_TIMEOUT,
                "Rendering timed out",
                Some(format!("{stage} exceeded {}s", limit.as_secs())),
            ),
            RenderError::Aborted { .. } => ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                codes::INTERNAL,
                "Rendering aborted unexpectedly",
                None,
            ),
        };
        api_error.with_detail(error.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let detail = self
            .detail
            .clone()
            .or_else(|| self.hint.clone())
            .unwrap_or_else(|| self.message.to_string());
        let body = ApiErrorBody {
            error: ApiErrorMessage {
                code: self.code.to_string(),
                message: self.message.to_string(),
                hint: self.hint,
            },
        };
        let mut response = (self.status, Json(body)).into_response();
        ErrorReport::from_message("infra::http::error", format!("{}: {detail}", self.code))
            .attach(&mut response);
        response
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::application::render::RenderStage;

    #[test]
    fn render_errors_map_to_distinct_statuses() {
        let cases = [
            (
                RenderError::launch("no chromium"),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (RenderError::load("aborted"), StatusCode::UNPROCESSABLE_ENTITY),
            (
                RenderError::capture("crashed"),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                RenderError::Timeout {
                    stage: RenderStage::Load,
                    limit: Duration::from_secs(30),
                },
                StatusCode::GATEWAY_TIMEOUT,
            ),
        ];

        for (error, status) in cases {
            assert_eq!(ApiError::from(error).status(), status);
        }
        assert_eq!(
            ApiError::from(RenderError::load("aborted")).code(),
            codes::LOAD_FAILED
        );
    }

    #[test]
    fn engine_detail_stays_out_of_the_body() {
        let response = ApiError::from(RenderError::launch("/usr/bin/chromium missing"))
            .into_response();
        let report = response
            .extensions()
            .get::<ErrorReport>()
            .expect("report attached");
        assert!(report.messages[0].contains("/usr/bin/chromium missing"));
    }
}
