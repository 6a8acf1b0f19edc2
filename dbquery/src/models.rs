use crate::core::ListResult;
use crate::filtering::pagination::response_headers;
use axum::Json;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::{Map, Value};

/// Body of a list response.
///
/// ```json
/// {"results": [...], "total": 120, "returned": 20, "total_count": {"Chairs": 12}}
/// ```
///
/// As a handler return value it also sets the `x-api-total` and
/// `x-api-returned` headers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListResponse<T> {
    pub results: Vec<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    pub returned: usize,
    /// `total_*` entries, flattened into the top level
    #[serde(flatten)]
    pub totals: Map<String, Value>,
}

impl<T> ListResponse<T> {
    #[must_use]
    pub fn new(results: Vec<T>, total: Option<u64>) -> Self {
        Self {
            returned: results.len(),
            results,
            total,
            totals: Map::new(),
        }
    }

    #[must_use]
    pub fn with_totals(mut self, totals: Map<String, Value>) -> Self {
        self.totals = totals;
        self
    }

    /// Convert every row, e.g. from JSON rows into typed models
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> ListResponse<U> {
        ListResponse {
            results: self.results.into_iter().map(f).collect(),
            total: self.total,
            returned: self.returned,
            totals: self.totals,
        }
    }
}

impl From<ListResult> for ListResponse<Value> {
    fn from(result: ListResult) -> Self {
        Self::new(result.results, result.total).with_totals(result.totals)
    }
}

impl<T: Serialize> IntoResponse for ListResponse<T> {
    fn into_response(self) -> Response {
        (response_headers(self.total, self.returned), Json(self)).into_response()
    }
}
