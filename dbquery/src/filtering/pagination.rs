use super::params::{PARAM_LIMIT, PARAM_OFFSET, PARAM_TOTAL_COUNT};
use crate::config::QueryOptions;
use crate::errors::QueryError;
use crate::schema::ResourceSchema;
use axum::http::{HeaderMap, HeaderName, HeaderValue};

pub const HEADER_TOTAL: HeaderName = HeaderName::from_static("x-api-total");
pub const HEADER_RETURNED: HeaderName = HeaderName::from_static("x-api-returned");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PaginationSpec {
    /// Effective page size after defaults and clamping; `None` is unbounded
    pub limit: Option<u64>,
    pub offset: u64,
    /// Whether to count the full filtered set
    pub want_total: bool,
}

/// Parse `limit`, `offset` and `total_count`, applying the resource default limit
/// and clamping to the maximum.
///
/// # Errors
///
/// Returns `MalformedParameter` when `limit` is not a positive integer, `offset`
/// not a non-negative integer, or `total_count` not a boolean.
pub fn parse_pagination(
    limit: Option<&str>,
    offset: Option<&str>,
    total_count: Option<&str>,
    schema: &ResourceSchema,
    options: &QueryOptions,
) -> Result<PaginationSpec, QueryError> {
    let requested = match limit.map(str::trim).filter(|v| !v.is_empty()) {
        None => None,
        Some(raw) => match raw.parse::<u64>() {
            Ok(0) | Err(_) => {
                return Err(QueryError::malformed_parameter(
                    PARAM_LIMIT,
                    format!("'{raw}' is not a positive integer"),
                ));
            }
            Ok(n) => Some(n),
        },
    };

    let offset = match offset.map(str::trim).filter(|v| !v.is_empty()) {
        None => 0,
        Some(raw) => raw.parse::<u64>().map_err(|_| {
            QueryError::malformed_parameter(
                PARAM_OFFSET,
                format!("'{raw}' is not a non-negative integer"),
            )
        })?,
    };

    let want_total = match total_count {
        None => false,
        Some(raw) => parse_bool(raw).ok_or_else(|| {
            QueryError::malformed_parameter(PARAM_TOTAL_COUNT, format!("'{raw}' is not a boolean"))
        })?,
    };

    let max_limit = schema.max_limit.or(options.max_limit);
    let mut limit = requested.or(schema.default_limit).or(options.default_limit);
    if let (Some(max), Some(current)) = (max_limit, limit)
        && current > max
    {
        tracing::warn!(
            resource = %schema.name,
            requested = current,
            max_limit = max,
            "Requested limit exceeds maximum, clamping"
        );
        limit = Some(max);
    }
    if limit.is_none() {
        limit = max_limit;
    }

    Ok(PaginationSpec {
        limit,
        offset,
        want_total,
    })
}

/// Parse a boolean query value
#[must_use]
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "" | "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Response headers carrying the total (empty when not counted) and the number of
/// rows returned
#[must_use]
pub fn response_headers(total: Option<u64>, returned: usize) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let total = total.map_or_else(|| HeaderValue::from_static(""), HeaderValue::from);
    headers.insert(HEADER_TOTAL, total);
    headers.insert(HEADER_RETURNED, HeaderValue::from(returned));
    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    fn parse(limit: Option<&str>, offset: Option<&str>) -> Result<PaginationSpec, QueryError> {
        parse_pagination(
            limit,
            offset,
            None,
            &ResourceSchema::new("items", "items"),
            &QueryOptions::default(),
        )
    }

    #[test]
    fn test_defaults() {
        let spec = parse(None, None).unwrap();
        assert_eq!(spec, PaginationSpec::default());
    }

    #[test]
    fn test_explicit_values() {
        let spec = parse(Some("25"), Some("50")).unwrap();
        assert_eq!(spec.limit, Some(25));
        assert_eq!(spec.offset, 50);
    }

    #[test]
    fn test_invalid_limits() {
        for raw in ["0", "-3", "ten", "1.5"] {
            let err = parse(Some(raw), None).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::MalformedParameter);
            assert_eq!(err.param(), "limit");
        }
        let err = parse(None, Some("-1")).unwrap_err();
        assert_eq!(err.param(), "offset");
    }

    #[test]
    fn test_resource_limits_override_options() {
        let schema = ResourceSchema::new("items", "items").with_limits(Some(10), Some(50));
        let options = QueryOptions::default().with_limits(Some(100), Some(1000));

        let spec = parse_pagination(None, None, None, &schema, &options).unwrap();
        assert_eq!(spec.limit, Some(10));

        let spec = parse_pagination(Some("500"), None, None, &schema, &options).unwrap();
        assert_eq!(spec.limit, Some(50));
    }

    #[test]
    fn test_max_limit_bounds_unlimited_requests() {
        let options = QueryOptions::default().with_limits(None, Some(200));
        let schema = ResourceSchema::new("items", "items");
        let spec = parse_pagination(None, None, None, &schema, &options).unwrap();
        assert_eq!(spec.limit, Some(200));
    }

    #[test]
    fn test_total_count_flag() {
        let schema = ResourceSchema::new("items", "items");
        let options = QueryOptions::default();
        let spec = parse_pagination(None, None, Some("true"), &schema, &options).unwrap();
        assert!(spec.want_total);
        let spec = parse_pagination(None, None, Some(""), &schema, &options).unwrap();
        assert!(spec.want_total);
        let spec = parse_pagination(None, None, Some("0"), &schema, &options).unwrap();
        assert!(!spec.want_total);
        let err = parse_pagination(None, None, Some("maybe"), &schema, &options).unwrap_err();
        assert_eq!(err.param(), "total_count");
    }

    #[test]
    fn test_response_headers() {
        let headers = response_headers(Some(42), 10);
        assert_eq!(headers.get("x-api-total").unwrap(), "42");
        assert_eq!(headers.get("x-api-returned").unwrap(), "10");

        let headers = response_headers(None, 0);
        assert_eq!(headers.get("x-api-total").unwrap(), "");
        assert_eq!(headers.get("x-api-returned").unwrap(), "0");
    }
}
