//! # Query Parameter Parsing
//!
//! This module turns the raw parameters of a list request into the typed parts of a
//! [`ListQuery`](crate::query::ListQuery): a filter tree, an ordering, pagination,
//! an aggregation request and the relations to load. Nothing here knows about a
//! particular storage backend.
//!
//! ## Query Parameter Examples
//!
//! ### Simple Filters
//! ```text
//! // Equality (the default operator)
//! GET /products?name=chair
//!
//! // Operator suffixes
//! GET /products?price__gte=10&price__lt=100
//! GET /products?name__istartswith=ch
//! GET /products?id__in=1,2,3
//! GET /products?created__range=2024-01-01,2024-12-31
//! GET /products?deleted_at__isnull=
//!
//! // Relation paths
//! GET /products?category__name__iexact=furniture
//!
//! // Function chains
//! GET /products?name__func__lower__length__gt=5
//! ```
//!
//! ### Full-text Search
//! ```text
//! GET /products?q=red chair            // resource default attributes and mode
//! GET /products?q__and=red chair       // every word must match
//! GET /products?q__name,description__or=red chair
//! ```
//!
//! ### Nested Logic
//! ```text
//! GET /products?search={"or": [{"price__lt": 10}, {"not": {"category__name": "outlet"}}]}
//! ```
//!
//! ### Ordering, Pagination, Aggregation
//! ```text
//! GET /products?order=-price,name&limit=20&offset=40&total_count=true
//! GET /products?totals=count,sum__price&group_by=category&group_limit=3
//! GET /products?relations=category,reviews
//! ```

pub mod aggregate;
pub mod conditions;
pub mod joined;
pub mod operators;
pub mod pagination;
pub mod params;
pub mod search;
pub mod sort;

pub use aggregate::{AggregateSpec, Metric, MetricFunction, parse_aggregate};
pub use conditions::{Comparison, FilterNode, FilterTreeBuilder, LogicalKind};
pub use joined::{RelationFetchSpec, parse_relations};
pub use operators::{Arity, Operator};
pub use pagination::{PaginationSpec, parse_pagination, response_headers};
pub use params::{AttributePath, FunctionCall, ParsedKey, QueryParams, parse_key};
pub use search::FullText;
pub use sort::{Direction, OrderItem, OrderSpec, parse_order};
