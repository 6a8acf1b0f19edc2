//! # Query Errors
//!
//! Every failure while parsing, validating or compiling a list request is a
//! [`QueryError`]. Each error carries the offending parameter name so clients can
//! point at the exact query-string key (or JSON path inside `search`) that was
//! rejected, plus a stable machine-readable [`ErrorKind`] code.
//!
//! Query errors are always client errors: they render as `400 Bad Request` with a
//! JSON body of the form
//!
//! ```json
//! { "error": "unknown_attribute", "message": "...", "param": "colour__exact" }
//! ```
//!
//! Failures that happen while *running* a compiled query against a database are
//! [`ExecutionError`]s. Database details are logged server-side and never sent to
//! the client.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use dbquery::{QueryError, QueryParams};
//!
//! async fn list(params: QueryParams) -> Result<Json<Value>, QueryError> {
//!     let compiled = registry
//!         .resource("products")
//!         .expect("registered at startup")
//!         .compile(&params)?;
//!     // ...
//! }
//! ```

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use sea_orm::DbErr;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Stable error classification exposed to clients as the `error` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    MalformedParameter,
    MalformedFilter,
    MalformedAggregate,
    UnknownAttribute,
    UnsupportedOperator,
    InvalidRelationPath,
    UnsupportedByBackend,
}

impl ErrorKind {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::MalformedParameter => "malformed_parameter",
            Self::MalformedFilter => "malformed_filter",
            Self::MalformedAggregate => "malformed_aggregate",
            Self::UnknownAttribute => "unknown_attribute",
            Self::UnsupportedOperator => "unsupported_operator",
            Self::InvalidRelationPath => "invalid_relation_path",
            Self::UnsupportedByBackend => "unsupported_by_backend",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A rejected list request.
///
/// Produced by the parameter parser, the schema validator and the backend
/// compilers. Parsing and validation are fail-fast, so a request yields at most one
/// of these.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    /// A parameter value (or key) could not be parsed at all
    #[error("Parameter '{param}' is malformed: {reason}")]
    MalformedParameter { param: String, reason: String },

    /// The `search` JSON tree has an invalid shape
    #[error("Filter '{param}' is malformed: {reason}")]
    MalformedFilter { param: String, reason: String },

    /// The `totals` / `group_by` / `group_limit` request is invalid
    #[error("Aggregation '{param}' is malformed: {reason}")]
    MalformedAggregate { param: String, reason: String },

    /// An attribute path does not end on a declared attribute
    #[error("Param '{param}' is invalid, '{attribute}' is not a known attribute")]
    UnknownAttribute { param: String, attribute: String },

    /// The operator exists but cannot be applied to the attribute's kind
    #[error(
        "Param '{param}' is invalid, operator '{operator}' cannot be applied to {kind} attribute '{attribute}'"
    )]
    UnsupportedOperator {
        param: String,
        operator: String,
        attribute: String,
        kind: String,
    },

    /// A relation segment of an attribute path does not name a relation
    #[error("Param '{param}' is invalid, '{segment}' is not a relation")]
    InvalidRelationPath { param: String, segment: String },

    /// The request is valid but the target backend cannot express it
    #[error("Param '{param}' is not supported by the {backend} backend: {feature}")]
    UnsupportedByBackend {
        param: String,
        backend: String,
        feature: String,
    },
}

impl QueryError {
    pub fn malformed_parameter(param: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedParameter {
            param: param.into(),
            reason: reason.into(),
        }
    }

    pub fn malformed_filter(param: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedFilter {
            param: param.into(),
            reason: reason.into(),
        }
    }

    pub fn malformed_aggregate(param: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedAggregate {
            param: param.into(),
            reason: reason.into(),
        }
    }

    pub fn unknown_attribute(param: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self::UnknownAttribute {
            param: param.into(),
            attribute: attribute.into(),
        }
    }

    pub fn unsupported_operator(
        param: impl Into<String>,
        operator: impl Into<String>,
        attribute: impl Into<String>,
        kind: impl fmt::Display,
    ) -> Self {
        Self::UnsupportedOperator {
            param: param.into(),
            operator: operator.into(),
            attribute: attribute.into(),
            kind: kind.to_string(),
        }
    }

    pub fn invalid_relation_path(param: impl Into<String>, segment: impl Into<String>) -> Self {
        Self::InvalidRelationPath {
            param: param.into(),
            segment: segment.into(),
        }
    }

    pub fn unsupported_by_backend(
        param: impl Into<String>,
        backend: impl fmt::Display,
        feature: impl Into<String>,
    ) -> Self {
        Self::UnsupportedByBackend {
            param: param.into(),
            backend: backend.to_string(),
            feature: feature.into(),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::MalformedParameter { .. } => ErrorKind::MalformedParameter,
            Self::MalformedFilter { .. } => ErrorKind::MalformedFilter,
            Self::MalformedAggregate { .. } => ErrorKind::MalformedAggregate,
            Self::UnknownAttribute { .. } => ErrorKind::UnknownAttribute,
            Self::UnsupportedOperator { .. } => ErrorKind::UnsupportedOperator,
            Self::InvalidRelationPath { .. } => ErrorKind::InvalidRelationPath,
            Self::UnsupportedByBackend { .. } => ErrorKind::UnsupportedByBackend,
        }
    }

    /// The offending parameter name, or JSON path inside `search`
    #[must_use]
    pub fn param(&self) -> &str {
        match self {
            Self::MalformedParameter { param, .. }
            | Self::MalformedFilter { param, .. }
            | Self::MalformedAggregate { param, .. }
            | Self::UnknownAttribute { param, .. }
            | Self::UnsupportedOperator { param, .. }
            | Self::InvalidRelationPath { param, .. }
            | Self::UnsupportedByBackend { param, .. } => param,
        }
    }

    /// Query errors are caused by the request, never by the server
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        StatusCode::BAD_REQUEST
    }
}

/// JSON body sent to clients for a rejected request
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorKind,
    pub message: String,
    pub param: String,
}

impl From<&QueryError> for ErrorResponse {
    fn from(err: &QueryError) -> Self {
        Self {
            error: err.kind(),
            message: err.to_string(),
            param: err.param().to_string(),
        }
    }
}

impl IntoResponse for QueryError {
    fn into_response(self) -> Response {
        tracing::debug!(
            kind = %self.kind(),
            param = self.param(),
            "Rejecting list request: {}",
            self
        );

        (self.status_code(), Json(ErrorResponse::from(&self))).into_response()
    }
}

/// Failure while running a compiled query
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error(transparent)]
    Query(#[from] QueryError),

    /// Internal error, logged but not exposed
    #[error("Database error: {0}")]
    Database(#[from] DbErr),
}

impl ExecutionError {
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Query(_) => StatusCode::BAD_REQUEST,
            Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ExecutionError {
    fn into_response(self) -> Response {
        match self {
            Self::Query(err) => err.into_response(),
            Self::Database(err) => {
                tracing::error!(error = ?err, "Database error while listing resources");
                let body = serde_json::json!({
                    "error": "internal_error",
                    "message": "A database error occurred",
                });
                (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_error_reports_its_param() {
        let errors = [
            QueryError::malformed_parameter("limit", "not an integer"),
            QueryError::malformed_filter("search.or", "expected an object"),
            QueryError::malformed_aggregate("totals", "unknown metric"),
            QueryError::unknown_attribute("colour", "colour"),
            QueryError::unsupported_operator("price__icontains", "icontains", "price", "numeric"),
            QueryError::invalid_relation_path("brand__name", "brand"),
            QueryError::unsupported_by_backend("name__match", "sqlite", "full-text match"),
        ];

        let params: Vec<&str> = errors.iter().map(QueryError::param).collect();
        assert_eq!(
            params,
            vec![
                "limit",
                "search.or",
                "totals",
                "colour",
                "price__icontains",
                "brand__name",
                "name__match"
            ]
        );
    }

    #[test]
    fn test_kind_codes_are_stable() {
        assert_eq!(
            QueryError::unknown_attribute("x", "x").kind().code(),
            "unknown_attribute"
        );
        assert_eq!(
            QueryError::unsupported_by_backend("x", "document", "f")
                .kind()
                .code(),
            "unsupported_by_backend"
        );
        assert_eq!(
            serde_json::to_value(ErrorKind::MalformedAggregate).unwrap(),
            serde_json::json!("malformed_aggregate")
        );
    }

    #[test]
    fn test_display_includes_offending_names() {
        let err = QueryError::unsupported_operator("price__icontains", "icontains", "price", "numeric");
        let message = err.to_string();
        assert!(message.contains("price__icontains"));
        assert!(message.contains("icontains"));
        assert!(message.contains("numeric"));
    }

    #[test]
    fn test_query_errors_are_bad_requests() {
        let response = QueryError::malformed_parameter("offset", "negative").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_error_response_body() {
        let err = QueryError::invalid_relation_path("brand__name", "brand");
        let body = serde_json::to_value(ErrorResponse::from(&err)).unwrap();
        assert_eq!(body["error"], "invalid_relation_path");
        assert_eq!(body["param"], "brand__name");
        assert!(body["message"].as_str().unwrap().contains("brand"));
    }

    #[test]
    fn test_database_errors_are_internal() {
        let err = ExecutionError::from(DbErr::Custom("connection refused".into()));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_wrapped_query_error_keeps_status() {
        let err = ExecutionError::from(QueryError::unknown_attribute("x", "x"));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(err.to_string().contains("'x'"));
    }
}
