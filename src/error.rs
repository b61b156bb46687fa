//! Typed errors and HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Rejections of order/filter/search input, raised before the store is touched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("malformed query: {0}")]
    MalformedQuerySpec(String),
    #[error("order by field not found: {0}")]
    OrderByFieldNotFound(String),
    #[error("ordering by field {field} of type {field_type} is not possible")]
    OrderByFieldNotPossible { field: String, field_type: String },
    #[error("filter field not found: {0}")]
    FilterFieldNotFound(String),
    #[error("view filter type does not exist: {0}")]
    ViewFilterTypeDoesNotExist(String),
    #[error("view filter type {filter_type} is not allowed for field type {field_type}")]
    ViewFilterTypeNotAllowedForField {
        filter_type: String,
        field_type: String,
    },
}

impl QueryError {
    pub fn code(&self) -> &'static str {
        match self {
            QueryError::MalformedQuerySpec(_) => "ERROR_MALFORMED_QUERY",
            QueryError::OrderByFieldNotFound(_) => "ERROR_ORDER_BY_FIELD_NOT_FOUND",
            QueryError::OrderByFieldNotPossible { .. } => "ERROR_ORDER_BY_FIELD_NOT_POSSIBLE",
            QueryError::FilterFieldNotFound(_) => "ERROR_FILTER_FIELD_NOT_FOUND",
            QueryError::ViewFilterTypeDoesNotExist(_) => "ERROR_VIEW_FILTER_TYPE_DOES_NOT_EXIST",
            QueryError::ViewFilterTypeNotAllowedForField { .. } => {
                "ERROR_VIEW_FILTER_TYPE_NOT_ALLOWED_FOR_FIELD"
            }
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error("unknown field type: {0}")]
    UnknownFieldType(String),
    #[error("stale reference: {kind} {id} no longer exists")]
    StaleReference { kind: &'static str, id: i64 },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("validation: {0}")]
    Validation(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
    #[error("store: {0}")]
    Store(String),
    #[error("serialization: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl AppError {
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Query(q) => {
                let status = match q {
                    QueryError::MalformedQuerySpec(_) => StatusCode::BAD_REQUEST,
                    QueryError::OrderByFieldNotFound(_) | QueryError::FilterFieldNotFound(_) => {
                        StatusCode::NOT_FOUND
                    }
                    _ => StatusCode::BAD_REQUEST,
                };
                (status, q.code())
            }
            AppError::UnknownFieldType(_) => (StatusCode::BAD_REQUEST, "ERROR_UNKNOWN_FIELD_TYPE"),
            AppError::StaleReference { .. } => (StatusCode::CONFLICT, "ERROR_STALE_REFERENCE"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "ERROR_NOT_FOUND"),
            AppError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "ERROR_VALIDATION"),
            AppError::Conflict(_) => (StatusCode::CONFLICT, "ERROR_CONFLICT"),
            AppError::Db(e) => {
                if let sqlx::Error::RowNotFound = e {
                    (StatusCode::NOT_FOUND, "ERROR_NOT_FOUND")
                } else {
                    (StatusCode::INTERNAL_SERVER_ERROR, "ERROR_DATABASE")
                }
            }
            AppError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "ERROR_STORE"),
            AppError::Serde(_) => (StatusCode::INTERNAL_SERVER_ERROR, "ERROR_SERIALIZATION"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message: self.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}
