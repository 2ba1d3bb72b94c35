//! Mapping of control-plane errors onto HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use stratus_core::{CoreError, FieldError, ResourceId};

/// Error returned by every handler.
#[derive(Debug)]
pub struct ApiError(pub CoreError);

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        Self(err)
    }
}

/// `{"error": {...}}`
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<FieldError>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dependents: Option<Vec<ResourceId>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflicts_with: Option<ResourceId>,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            CoreError::Validation(_) => StatusCode::BAD_REQUEST,
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            CoreError::Conflict(_)
            | CoreError::Overlap { .. }
            | CoreError::Dependency { .. }
            | CoreError::InvalidTransition { .. } => StatusCode::CONFLICT,
            CoreError::Provision(_) => StatusCode::BAD_GATEWAY,
            CoreError::Json(_) | CoreError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn detail(&self) -> ErrorDetail {
        let mut detail = ErrorDetail {
            code: self.0.code(),
            message: self.0.to_string(),
            fields: None,
            dependents: None,
            conflicts_with: None,
        };
        match &self.0 {
            CoreError::Validation(fields) => detail.fields = Some(fields.clone()),
            CoreError::Dependency { dependents, .. } => detail.dependents = Some(dependents.clone()),
            CoreError::Overlap { sibling, .. } => detail.conflicts_with = Some(sibling.clone()),
            CoreError::Json(_) | CoreError::Io(_) => detail.message = "internal error".into(),
            _ => {}
        }
        detail
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, code = self.0.code(), "Request failed");
        } else {
            tracing::debug!(error = %self.0, code = self.0.code(), "Request rejected");
        }

        let body = Json(ErrorResponse {
            error: self.detail(),
        });
        (status, body).into_response()
    }
}
