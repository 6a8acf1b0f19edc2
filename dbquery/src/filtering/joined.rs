//! `relations` parameter: which related resources to load alongside each row.
//!
//! `relations=category,reviews` loads the named relations; `relations=_all` loads
//! every relation of the root resource, one level deep.

use std::collections::BTreeSet;

pub const ALL_RELATIONS: &str = "_all";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RelationFetchSpec {
    #[default]
    None,
    Named(BTreeSet<String>),
    All,
}

impl RelationFetchSpec {
    #[must_use]
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

/// Parse every `relations` value; `_all` anywhere wins
#[must_use]
pub fn parse_relations(values: &[&str]) -> RelationFetchSpec {
    let mut names = BTreeSet::new();
    for name in values.iter().flat_map(|v| v.split(',')).map(str::trim) {
        if name == ALL_RELATIONS {
            return RelationFetchSpec::All;
        }
        if !name.is_empty() {
            names.insert(name.to_string());
        }
    }

    if names.is_empty() {
        RelationFetchSpec::None
    } else {
        RelationFetchSpec::Named(names)
    }
}
