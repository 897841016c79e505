use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::models::ScopeType;

#[derive(Error, Debug)]
pub enum SummaryError {
    #[error("{scope_type} {id} not found")]
    NotFound { scope_type: ScopeType, id: String },

    #[error("No read access to {id}")]
    Forbidden { id: String },

    #[error("Upstream did not answer for {scope} within {after:?}")]
    UpstreamTimeout { scope: String, after: Duration },

    #[error("Inconsistent data: {0}")]
    InconsistentData(String),

    #[error("Cannot combine an empty list of summaries")]
    EmptyInput,

    #[error("Cannot combine {expected} summaries with {found} summaries")]
    ScopeTypeMismatch { expected: ScopeType, found: ScopeType },

    #[error("Start date {start} is after end date {end}")]
    InvalidWindow { start: String, end: String },

    #[error("Invalid date: {0}")]
    InvalidDate(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SummaryError {
    pub fn not_found(scope_type: ScopeType, id: impl Into<String>) -> Self {
        SummaryError::NotFound {
            scope_type,
            id: id.into(),
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            SummaryError::NotFound { .. } => StatusCode::NOT_FOUND,
            SummaryError::Forbidden { .. } => StatusCode::FORBIDDEN,
            SummaryError::InvalidWindow { .. }
            | SummaryError::InvalidDate(_)
            | SummaryError::InvalidQuery(_) => {
                StatusCode::BAD_REQUEST
            }
            SummaryError::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for SummaryError {
    fn into_response(self) -> Response {
        let status = self.status();

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
