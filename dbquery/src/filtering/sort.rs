use super::params::{AttributePath, PARAM_ORDER};
use crate::errors::QueryError;
use sea_orm::sea_query::Order;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl From<Direction> for Order {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Asc => Order::Asc,
            Direction::Desc => Order::Desc,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderItem {
    pub path: AttributePath,
    pub direction: Direction,
}

/// Requested ordering, most significant first. Empty means "backend default"
/// (ascending primary key).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OrderSpec(pub Vec<OrderItem>);

impl OrderSpec {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, OrderItem> {
        self.0.iter()
    }
}

/// Parse every `order` value.
///
/// A value is either a JSON array of strings (`["-price","name"]`) or a
/// comma-separated list (`-price,name`). A leading `-` sorts descending, a
/// leading `+` or nothing ascending. Repeated `order` parameters append.
///
/// # Errors
///
/// Returns `MalformedParameter` for empty names or a non-string JSON array.
pub fn parse_order(values: &[&str]) -> Result<OrderSpec, QueryError> {
    let mut items = Vec::new();
    for value in values {
        let value = value.trim();
        let names: Vec<String> = if value.starts_with('[') {
            serde_json::from_str(value).map_err(|_| {
                QueryError::malformed_parameter(PARAM_ORDER, "expected a JSON array of strings")
            })?
        } else {
            value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        };

        for name in names {
            items.push(parse_order_item(name.trim())?);
        }
    }
    Ok(OrderSpec(items))
}

fn parse_order_item(name: &str) -> Result<OrderItem, QueryError> {
    let (direction, raw) = if let Some(rest) = name.strip_prefix('-') {
        (Direction::Desc, rest)
    } else if let Some(rest) = name.strip_prefix('+') {
        (Direction::Asc, rest)
    } else {
        (Direction::Asc, name)
    };

    if raw.is_empty() {
        return Err(QueryError::malformed_parameter(
            PARAM_ORDER,
            format!("'{name}' does not name an attribute"),
        ));
    }

    Ok(OrderItem {
        path: AttributePath::parse(PARAM_ORDER, raw)?,
        direction,
    })
}
