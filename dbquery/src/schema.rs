//! Resource schemas: the attributes, relations and full-text settings a list
//! endpoint exposes.
//!
//! Schemas are plain data. They can be written in code with the builder methods
//! or deserialized from configuration, then handed to a
//! [`SchemaRegistryBuilder`](crate::registry::SchemaRegistryBuilder) which checks
//! them once at startup.
//!
//! ```rust,ignore
//! let products = ResourceSchema::new("products", "products")
//!     .with_attribute(AttributeDef::new("id", AttributeKind::Numeric))
//!     .with_attribute(AttributeDef::new("name", AttributeKind::String).keyword("raw"))
//!     .with_attribute(AttributeDef::new("tags", AttributeKind::Collection))
//!     .with_relation(RelationDef::to_one("category", "categories", "category_id", "id"))
//!     .with_fulltext(&["name", "description"], false);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Value domain of an attribute, used to check operator compatibility and to
/// coerce operands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeKind {
    /// Untyped scalar, operands pass through unchanged
    Scalar,
    String,
    Numeric,
    Boolean,
    Date,
    #[serde(alias = "datetime")]
    DateTime,
    Uuid,
    /// Array of scalars
    Collection,
    /// Structured document (JSON object)
    Json,
}

impl AttributeKind {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Scalar => "scalar",
            Self::String => "string",
            Self::Numeric => "numeric",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::DateTime => "date_time",
            Self::Uuid => "uuid",
            Self::Collection => "collection",
            Self::Json => "json",
        }
    }

    /// Kinds with a total order, usable for ranges, sorting and min/max
    #[must_use]
    pub const fn is_ordered(self) -> bool {
        matches!(
            self,
            Self::Scalar | Self::String | Self::Numeric | Self::Date | Self::DateTime | Self::Uuid
        )
    }

    /// Kinds that hold a single value, usable for grouping
    #[must_use]
    pub const fn is_scalar(self) -> bool {
        !matches!(self, Self::Collection | Self::Json)
    }
}

impl fmt::Display for AttributeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn default_element_kind() -> AttributeKind {
    AttributeKind::Scalar
}

/// A filterable, sortable attribute of a resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeDef {
    /// Public name used in query parameters
    pub name: String,
    pub kind: AttributeKind,
    /// Physical column or field name when it differs from `name`
    #[serde(default)]
    pub column: Option<String>,
    /// Search-index sub-field holding the untokenized value (e.g. `raw` for `name.raw`)
    #[serde(default)]
    pub keyword_field: Option<String>,
    /// Kind of the elements of a collection attribute
    #[serde(default = "default_element_kind")]
    pub element_kind: AttributeKind,
}

impl AttributeDef {
    pub fn new(name: impl Into<String>, kind: AttributeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            column: None,
            keyword_field: None,
            element_kind: AttributeKind::Scalar,
        }
    }

    #[must_use]
    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    #[must_use]
    pub fn keyword(mut self, sub_field: impl Into<String>) -> Self {
        self.keyword_field = Some(sub_field.into());
        self
    }

    #[must_use]
    pub fn elements(mut self, kind: AttributeKind) -> Self {
        self.element_kind = kind;
        self
    }

    /// Column or field name in storage
    #[must_use]
    pub fn column_name(&self) -> &str {
        self.column.as_deref().unwrap_or(&self.name)
    }
}

/// A named link from one resource to another.
///
/// For reference relations `local_key` lives on the owning resource and
/// `foreign_key` on the target. Embedded relations are stored inside the owning
/// document or index entry under `name` and ignore both keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationDef {
    pub name: String,
    /// Registered name of the target resource
    pub target: String,
    #[serde(default)]
    pub local_key: String,
    #[serde(default)]
    pub foreign_key: String,
    /// One owner row relates to many target rows
    #[serde(default)]
    pub many: bool,
    #[serde(default)]
    pub embedded: bool,
}

impl RelationDef {
    /// Many-to-one or one-to-one reference, e.g. `product.category_id -> category.id`
    pub fn to_one(
        name: impl Into<String>,
        target: impl Into<String>,
        local_key: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            local_key: local_key.into(),
            foreign_key: foreign_key.into(),
            many: false,
            embedded: false,
        }
    }

    /// One-to-many reference, e.g. `category.id -> product.category_id`
    pub fn to_many(
        name: impl Into<String>,
        target: impl Into<String>,
        local_key: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        Self {
            many: true,
            ..Self::to_one(name, target, local_key, foreign_key)
        }
    }

    /// Sub-document (or nested index object) stored under `name`
    pub fn embedded(name: impl Into<String>, target: impl Into<String>, many: bool) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            local_key: String::new(),
            foreign_key: String::new(),
            many,
            embedded: true,
        }
    }
}

fn default_primary_key() -> Vec<String> {
    vec!["id".to_string()]
}

/// Everything the query layer knows about one list endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSchema {
    /// Registered name
    pub name: String,
    /// Table, collection or index name
    pub storage: String,
    /// Default ordering when the request has none
    #[serde(default = "default_primary_key")]
    pub primary_key: Vec<String>,
    #[serde(default)]
    pub attributes: Vec<AttributeDef>,
    #[serde(default)]
    pub relations: Vec<RelationDef>,
    /// Attributes searched by a bare `q` parameter
    #[serde(default)]
    pub fulltext: Vec<String>,
    /// Whether a bare `q` requires every word to match
    #[serde(default)]
    pub fulltext_require_all: bool,
    #[serde(default)]
    pub default_limit: Option<u64>,
    #[serde(default)]
    pub max_limit: Option<u64>,
}

impl ResourceSchema {
    pub fn new(name: impl Into<String>, storage: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            storage: storage.into(),
            primary_key: default_primary_key(),
            attributes: Vec::new(),
            relations: Vec::new(),
            fulltext: Vec::new(),
            fulltext_require_all: false,
            default_limit: None,
            max_limit: None,
        }
    }

    #[must_use]
    pub fn with_primary_key(mut self, columns: &[&str]) -> Self {
        self.primary_key = columns.iter().map(ToString::to_string).collect();
        self
    }

    #[must_use]
    pub fn with_attribute(mut self, attribute: AttributeDef) -> Self {
        self.attributes.push(attribute);
        self
    }

    #[must_use]
    pub fn with_relation(mut self, relation: RelationDef) -> Self {
        self.relations.push(relation);
        self
    }

    #[must_use]
    pub fn with_fulltext(mut self, attributes: &[&str], require_all: bool) -> Self {
        self.fulltext = attributes.iter().map(ToString::to_string).collect();
        self.fulltext_require_all = require_all;
        self
    }

    #[must_use]
    pub fn with_limits(mut self, default_limit: Option<u64>, max_limit: Option<u64>) -> Self {
        self.default_limit = default_limit;
        self.max_limit = max_limit;
        self
    }

    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&AttributeDef> {
        self.attributes.iter().find(|a| a.name == name)
    }

    #[must_use]
    pub fn relation(&self, name: &str) -> Option<&RelationDef> {
        self.relations.iter().find(|r| r.name == name)
    }

    /// Checks the schema on its own; cross-resource checks happen in the registry
    ///
    /// # Errors
    ///
    /// Returns a [`SchemaError`] describing the first inconsistency found.
    pub fn check(&self) -> Result<(), SchemaError> {
        let mut seen = std::collections::HashSet::new();
        let names = self
            .attributes
            .iter()
            .map(|a| a.name.as_str())
            .chain(self.relations.iter().map(|r| r.name.as_str()));
        for name in names {
            if name.is_empty() || name.contains("__") {
                return Err(SchemaError::InvalidName {
                    resource: self.name.clone(),
                    name: name.to_string(),
                });
            }
            if !seen.insert(name) {
                return Err(SchemaError::DuplicateName {
                    resource: self.name.clone(),
                    name: name.to_string(),
                });
            }
        }

        for column in &self.fulltext {
            match self.attribute(column) {
                Some(attr) if attr.kind == AttributeKind::String => {}
                _ => {
                    return Err(SchemaError::InvalidFulltext {
                        resource: self.name.clone(),
                        attribute: column.clone(),
                    });
                }
            }
        }

        if self.primary_key.is_empty() {
            return Err(SchemaError::MissingPrimaryKey(self.name.clone()));
        }

        Ok(())
    }
}

/// Configuration errors detected while registering schemas
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("Resource '{0}' is registered twice")]
    DuplicateResource(String),

    #[error("Resource '{resource}' declares '{name}' more than once")]
    DuplicateName { resource: String, name: String },

    #[error("Resource '{resource}' has invalid attribute or relation name '{name}'")]
    InvalidName { resource: String, name: String },

    #[error("Relation '{relation}' of '{resource}' targets unregistered resource '{target}'")]
    UnknownTarget {
        resource: String,
        relation: String,
        target: String,
    },

    #[error("Relation '{relation}' of '{resource}' crosses backends")]
    CrossBackendRelation { resource: String, relation: String },

    #[error("Full-text attribute '{attribute}' of '{resource}' must be a string attribute")]
    InvalidFulltext { resource: String, attribute: String },

    #[error("Resource '{0}' has no primary key")]
    MissingPrimaryKey(String),
}
