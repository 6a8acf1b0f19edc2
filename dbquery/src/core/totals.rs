//! Folding grouped aggregate rows into the response's `total_*` entries.
//!
//! Every backend returns totals as flat rows with one column per group and per
//! metric. Clients receive one entry per metric, nested one level per group:
//!
//! ```json
//! {"total_sum_price": {"Chairs": {"Oak": 120.0, "Pine": 80.0}}}
//! ```

use serde_json::{Map, Value};

pub const TOTAL_PREFIX: &str = "total_";

/// Fold `rows` into `{"total_<metric>": value}`, or
/// `{"total_<metric>": {<group>: ... value}}` when grouped
#[must_use]
pub fn shape_totals(dimensions: &[String], metrics: &[String], rows: &[Map<String, Value>]) -> Map<String, Value> {
    let mut totals = Map::new();
    for metric in metrics {
        let value = match dimensions.split_last() {
            None => rows
                .first()
                .and_then(|row| row.get(metric))
                .cloned()
                .unwrap_or(Value::Null),
            Some((innermost, parents)) => {
                let mut tree = Map::new();
                for row in rows {
                    insert_group(&mut tree, parents, innermost, row, metric);
                }
                Value::Object(tree)
            }
        };
        totals.insert(format!("{TOTAL_PREFIX}{metric}"), value);
    }
    totals
}

fn insert_group(tree: &mut Map<String, Value>, parents: &[String], innermost: &str, row: &Map<String, Value>, metric: &str) {
    let mut node = tree;
    for dimension in parents {
        let entry = node
            .entry(group_key(row.get(dimension)))
            .or_insert_with(|| Value::Object(Map::new()));
        let Some(child) = entry.as_object_mut() else {
            return;
        };
        node = child;
    }
    node.insert(
        group_key(row.get(innermost)),
        row.get(metric).cloned().unwrap_or(Value::Null),
    );
}

/// Object key for a group value; `null` groups are keyed `"null"`
fn group_key(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => Value::Null.to_string(),
    }
}
