use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use utoipa::ToSchema;

use crate::models::Id;
use crate::repo::RepoError;

#[derive(Debug, Clone, Serialize, ToSchema, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ApiErrorBody {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldError>,
}

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("validation failed: {}", summarize(.0))]
    Validation(Vec<FieldError>),
    #[error("referenced {entity} {id} does not exist")]
    ReferenceNotFound { entity: &'static str, id: Id },
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Id },
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("authentication required")]
    Unauthorized,
    #[error("too many requests")]
    RateLimited,
    #[error("internal error")]
    Internal(String),
}

fn summarize(fields: &[FieldError]) -> String {
    fields
        .iter()
        .map(|f| format!("{}: {}", f.field, f.message))
        .collect::<Vec<_>>()
        .join("; ")
}

impl AppError {
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Validation(vec![FieldError { field: field.into(), message: message.into() }])
    }

    pub fn forbidden(action: &str) -> Self {
        AppError::Forbidden(format!("not allowed to {action}"))
    }

    /// Stable machine-readable kind, also used as the `error` body field.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation_error",
            AppError::ReferenceNotFound { .. } => "reference_not_found",
            AppError::NotFound { .. } => "not_found",
            AppError::Forbidden(_) => "authorization_error",
            AppError::Conflict(_) => "conflict",
            AppError::Unauthorized => "unauthorized",
            AppError::RateLimited => "rate_limited",
            AppError::Internal(_) => "internal",
        }
    }

    /// Turn a missing lookup into a dangling-reference error; a reference
    /// that does not resolve is a bad request, not a 404 on the target.
    pub fn into_reference(self) -> Self {
        match self {
            AppError::NotFound { entity, id } => AppError::ReferenceNotFound { entity, id },
            other => other,
        }
    }
}

impl From<RepoError> for AppError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::NotFound { entity, id } => AppError::NotFound { entity, id },
            RepoError::Conflict(what) => AppError::Conflict(what),
            RepoError::Internal(detail) => AppError::Internal(detail),
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::ReferenceNotFound { .. } => StatusCode::BAD_REQUEST,
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        if let AppError::Internal(detail) = self {
            log::error!("request failed: {detail}");
        }
        let fields = match self {
            AppError::Validation(f) => f.clone(),
            _ => Vec::new(),
        };
        HttpResponse::build(self.status_code()).json(ApiErrorBody {
            error: self.kind().to_string(),
            message: self.to_string(),
            fields,
        })
    }
}

/// Collects field-level problems so a caller sees all of them at once.
#[derive(Debug, Default)]
pub struct FieldErrors(Vec<FieldError>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&mut self, ok: bool, field: &str, message: &str) {
        if !ok {
            self.push(field, message);
        }
    }

    pub fn push(&mut self, field: &str, message: &str) {
        self.0.push(FieldError { field: field.to_string(), message: message.to_string() });
    }

    pub fn finish(self) -> Result<(), AppError> {
        if self.0.is_empty() { Ok(()) } else { Err(AppError::Validation(self.0)) }
    }
}
