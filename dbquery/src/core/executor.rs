use crate::backends::relational::{COUNT_ALIAS, EagerLoad, EagerStrategy, RelationalQuery, TotalsQuery};
use crate::core::totals::shape_totals;
use crate::errors::ExecutionError;
use crate::values::Scalar;
use async_trait::async_trait;
use sea_orm::{ConnectionTrait, DatabaseConnection, DbErr, FromQueryResult, JsonValue, QueryResult, Statement};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Label of the bare `count` metric
const COUNT_METRIC: &str = "count";

/// Rows, total and shaped totals of one list request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListResult {
    pub results: Vec<Value>,
    /// Size of the whole filtered set, when requested
    pub total: Option<u64>,
    /// `total_*` entries, empty without an aggregate
    pub totals: Map<String, Value>,
}

#[async_trait]
pub trait ListExecutor {
    /// Run the compiled query and everything that hangs off it (count, totals,
    /// related rows)
    ///
    /// # Errors
    ///
    /// Returns `ExecutionError::Database` when any statement fails.
    async fn execute(&self, db: &DatabaseConnection) -> Result<ListResult, ExecutionError>;
}

#[async_trait]
impl ListExecutor for RelationalQuery {
    async fn execute(&self, db: &DatabaseConnection) -> Result<ListResult, ExecutionError> {
        let mut results = rows(db, self.statement()).await?;

        let mut total = match self.count_statement() {
            Some(statement) => Some(count(db, statement).await?),
            None => None,
        };

        let totals = match (&self.totals, self.totals_statement()) {
            (Some(totals), Some(statement)) => {
                let grouped = totals_rows(db, statement, totals).await?;
                // An ungrouped bare count is the size of the filtered set
                if total.is_none() && totals.dimensions.is_empty() {
                    total = grouped
                        .first()
                        .and_then(|row| row.get(COUNT_METRIC))
                        .and_then(Value::as_u64);
                }
                shape_totals(&totals.dimensions, &totals.metrics, &grouped)
            }
            _ => Map::new(),
        };

        for load in &self.eager {
            attach(db, self, load, &mut results).await?;
        }

        tracing::debug!(
            rows = results.len(),
            total = ?total,
            relations = self.eager.len(),
            "Executed list query"
        );
        Ok(ListResult {
            results,
            total,
            totals,
        })
    }
}

async fn rows(db: &DatabaseConnection, statement: Statement) -> Result<Vec<Value>, DbErr> {
    JsonValue::find_by_statement(statement).all(db).await
}

/// Decode totals rows column by column. Computed columns carry no declared
/// type on every driver, so each one is read as the widest type it can hold.
async fn totals_rows(
    db: &DatabaseConnection,
    statement: Statement,
    totals: &TotalsQuery,
) -> Result<Vec<Map<String, Value>>, DbErr> {
    let rows = db.query_all(statement).await?;
    Ok(rows
        .iter()
        .map(|row| {
            let mut map = Map::new();
            for label in &totals.dimensions {
                map.insert(label.clone(), dimension_value(row, label));
            }
            for label in &totals.metrics {
                map.insert(label.clone(), metric_value(row, label));
            }
            map
        })
        .collect())
}

fn dimension_value(row: &QueryResult, label: &str) -> Value {
    if let Ok(value) = row.try_get::<Option<String>>("", label) {
        return value.map_or(Value::Null, Value::String);
    }
    if let Ok(Some(value)) = row.try_get::<Option<i64>>("", label) {
        return Value::from(value);
    }
    if let Ok(Some(value)) = row.try_get::<Option<i32>>("", label) {
        return Value::from(value);
    }
    if let Ok(Some(value)) = row.try_get::<Option<bool>>("", label) {
        return Value::Bool(value);
    }
    metric_value(row, label)
}

fn metric_value(row: &QueryResult, label: &str) -> Value {
    if let Ok(Some(value)) = row.try_get::<Option<i64>>("", label) {
        return Value::from(value);
    }
    if let Ok(Some(value)) = row.try_get::<Option<f64>>("", label) {
        return Value::from(value);
    }
    Value::Null
}

async fn count(db: &DatabaseConnection, statement: Statement) -> Result<u64, DbErr> {
    let total: i64 = match db.query_one(statement).await? {
        Some(row) => row.try_get("", COUNT_ALIAS)?,
        None => 0,
    };
    Ok(u64::try_from(total).unwrap_or_default())
}

/// Load one relation for every row of the page and store it under the
/// relation's name
async fn attach(
    db: &DatabaseConnection,
    query: &RelationalQuery,
    load: &EagerLoad,
    results: &mut [Value],
) -> Result<(), DbErr> {
    match load.strategy {
        EagerStrategy::Batched => {
            let mut keys: Vec<(String, Value)> = results
                .iter()
                .filter_map(|row| row.get(&load.local_key))
                .filter_map(|key| relation_key(key).map(|normalized| (normalized, key.clone())))
                .collect();
            keys.sort_by(|a, b| a.0.cmp(&b.0));
            keys.dedup_by(|a, b| a.0 == b.0);

            let mut related: HashMap<String, Vec<Value>> = HashMap::new();
            if !keys.is_empty() {
                let statement = load.statement(keys.iter().map(|(_, key)| Scalar::from_json(key).into()));
                for row in rows(db, query.backend.build(&statement)).await? {
                    let Some(key) = row.get(&load.foreign_key).and_then(relation_key) else {
                        continue;
                    };
                    related.entry(key).or_default().push(row);
                }
            }

            for row in results.iter_mut() {
                let key = row.get(&load.local_key).and_then(relation_key);
                let found = key.and_then(|key| related.get(&key).cloned()).unwrap_or_default();
                set_relation(row, load, found);
            }
        }
        EagerStrategy::PerRow => {
            for row in results.iter_mut() {
                let found = match row.get(&load.local_key).filter(|key| !key.is_null()) {
                    Some(key) => {
                        let statement = load.statement([Scalar::from_json(key).into()]);
                        rows(db, query.backend.build(&statement)).await?
                    }
                    None => Vec::new(),
                };
                set_relation(row, load, found);
            }
        }
    }
    Ok(())
}

/// Join key of a relation column, equal for `1`, `1.0` and `"1"`. Null keys
/// relate to nothing.
fn relation_key(value: &Value) -> Option<String> {
    match Scalar::from_json(value) {
        Scalar::Null => None,
        Scalar::Int(i) => Some(i.to_string()),
        #[allow(clippy::cast_possible_truncation)]
        Scalar::Float(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => Some((f as i64).to_string()),
        Scalar::Text(s) => Some(s.parse::<i64>().map_or(s, |i| i.to_string())),
        other => Some(other.to_json().to_string()),
    }
}

fn set_relation(row: &mut Value, load: &EagerLoad, mut found: Vec<Value>) {
    let Value::Object(map) = row else {
        return;
    };
    let value = if load.many {
        Value::Array(found)
    } else if found.is_empty() {
        Value::Null
    } else {
        found.swap_remove(0)
    };
    map.insert(load.relation.clone(), value);
}
