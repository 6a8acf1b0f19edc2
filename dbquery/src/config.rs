use serde::Deserialize;

pub const DEFAULT_MULTIVALUE_SEPARATOR: char = ',';
pub const DEFAULT_FULLTEXT_LANGUAGE: &str = "english";

/// Registry-wide settings shared by every registered resource.
///
/// Resource schemas may override `default_limit` and `max_limit`; everything else
/// applies uniformly. Deserializable so applications can load it from their own
/// configuration files:
///
/// ```rust,ignore
/// let options: QueryOptions = serde_json::from_str(r#"{"max_limit": 500}"#)?;
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct QueryOptions {
    /// Separator for list-valued simple parameters (`in`, `range`, `hasall`, ...)
    pub multivalue_separator: char,
    /// Limit applied when the request has none
    pub default_limit: Option<u64>,
    /// Upper bound for any requested limit; larger values are clamped
    pub max_limit: Option<u64>,
    /// Text-search configuration used by `match` and `q` on Postgres
    pub fulltext_language: String,
    /// Below this page size relations are loaded per row instead of batched
    pub eager_limit: Option<u64>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            multivalue_separator: DEFAULT_MULTIVALUE_SEPARATOR,
            default_limit: None,
            max_limit: None,
            fulltext_language: DEFAULT_FULLTEXT_LANGUAGE.to_string(),
            eager_limit: None,
        }
    }
}

impl QueryOptions {
    #[must_use]
    pub fn with_limits(mut self, default_limit: Option<u64>, max_limit: Option<u64>) -> Self {
        self.default_limit = default_limit;
        self.max_limit = max_limit;
        self
    }

    #[must_use]
    pub fn with_separator(mut self, separator: char) -> Self {
        self.multivalue_separator = separator;
        self
    }

    #[must_use]
    pub fn with_fulltext_language(mut self, language: impl Into<String>) -> Self {
        self.fulltext_language = language.into();
        self
    }

    #[must_use]
    pub fn with_eager_limit(mut self, eager_limit: Option<u64>) -> Self {
        self.eager_limit = eager_limit;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_falls_back_to_defaults() {
        let options: QueryOptions =
            serde_json::from_str(r#"{"max_limit": 100, "multivalue_separator": ";"}"#).unwrap();
        assert_eq!(options.max_limit, Some(100));
        assert_eq!(options.multivalue_separator, ';');
        assert_eq!(options.fulltext_language, "english");
        assert_eq!(options.default_limit, None);
    }

    #[test]
    fn test_builders() {
        let options = QueryOptions::default()
            .with_limits(Some(20), Some(200))
            .with_fulltext_language("simple")
            .with_eager_limit(Some(5));
        assert_eq!(options.default_limit, Some(20));
        assert_eq!(options.max_limit, Some(200));
        assert_eq!(options.fulltext_language, "simple");
        assert_eq!(options.eager_limit, Some(5));
    }
}
