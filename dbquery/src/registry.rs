use crate::backends::{Backend, BackendKind, CompileContext, CompiledQuery};
use crate::config::QueryOptions;
use crate::errors::QueryError;
use crate::filtering::params::QueryParams;
use crate::query::ListQuery;
use crate::schema::{ResourceSchema, SchemaError};
use crate::validation;
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct RegisteredResource {
    schema: ResourceSchema,
    backend: Backend,
}

/// Immutable set of resource schemas and the backend each one compiles for.
///
/// Built once at startup and shared (typically behind an `Arc`) by every request
/// handler:
///
/// ```rust,ignore
/// let registry = SchemaRegistry::builder()
///     .options(QueryOptions::default().with_limits(Some(50), Some(500)))
///     .register(products, Backend::relational(DatabaseBackend::Postgres))
///     .register(categories, Backend::relational(DatabaseBackend::Postgres))
///     .build()?;
///
/// let compiled = registry.resource("products").unwrap().compile(&params)?;
/// ```
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    resources: HashMap<String, RegisteredResource>,
    options: QueryOptions,
}

impl SchemaRegistry {
    #[must_use]
    pub fn builder() -> SchemaRegistryBuilder {
        SchemaRegistryBuilder::default()
    }

    #[must_use]
    pub fn schema(&self, name: &str) -> Option<&ResourceSchema> {
        self.resources.get(name).map(|r| &r.schema)
    }

    #[must_use]
    pub fn backend_kind(&self, name: &str) -> Option<BackendKind> {
        self.resources.get(name).map(|r| r.backend.kind())
    }

    #[must_use]
    pub fn options(&self) -> &QueryOptions {
        &self.options
    }

    /// Handle for compiling list requests against one resource
    #[must_use]
    pub fn resource(&self, name: &str) -> Option<Resource<'_>> {
        self.resources.get(name).map(|entry| Resource {
            registry: self,
            entry,
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.resources.keys().map(String::as_str)
    }
}

#[derive(Debug, Default)]
pub struct SchemaRegistryBuilder {
    resources: Vec<RegisteredResource>,
    options: QueryOptions,
}

impl SchemaRegistryBuilder {
    #[must_use]
    pub fn options(mut self, options: QueryOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn register(mut self, schema: ResourceSchema, backend: Backend) -> Self {
        self.resources.push(RegisteredResource { schema, backend });
        self
    }

    /// Check every schema and every relation target, then freeze the registry
    ///
    /// # Errors
    ///
    /// Returns the first [`SchemaError`] found.
    pub fn build(self) -> Result<SchemaRegistry, SchemaError> {
        let mut resources = HashMap::with_capacity(self.resources.len());
        for resource in self.resources {
            resource.schema.check()?;
            let name = resource.schema.name.clone();
            if resources.insert(name.clone(), resource).is_some() {
                return Err(SchemaError::DuplicateResource(name));
            }
        }

        for resource in resources.values() {
            for relation in &resource.schema.relations {
                let target = resources.get(&relation.target).ok_or_else(|| SchemaError::UnknownTarget {
                    resource: resource.schema.name.clone(),
                    relation: relation.name.clone(),
                    target: relation.target.clone(),
                })?;
                if target.backend.kind() != resource.backend.kind() {
                    return Err(SchemaError::CrossBackendRelation {
                        resource: resource.schema.name.clone(),
                        relation: relation.name.clone(),
                    });
                }
            }
        }

        tracing::debug!(resources = resources.len(), "Schema registry built");
        Ok(SchemaRegistry {
            resources,
            options: self.options,
        })
    }
}

/// A registered resource together with the registry it belongs to
#[derive(Debug, Clone, Copy)]
pub struct Resource<'r> {
    registry: &'r SchemaRegistry,
    entry: &'r RegisteredResource,
}

impl<'r> Resource<'r> {
    #[must_use]
    pub fn schema(&self) -> &'r ResourceSchema {
        &self.entry.schema
    }

    #[must_use]
    pub fn backend(&self) -> &'r Backend {
        &self.entry.backend
    }

    /// Parse raw parameters without validating them against the schema
    ///
    /// # Errors
    ///
    /// Returns a `Malformed*` error for unparseable parameters.
    pub fn parse(&self, params: &QueryParams) -> Result<ListQuery, QueryError> {
        ListQuery::parse(params, self.schema(), &self.registry.options)
    }

    /// # Errors
    ///
    /// Returns the first schema violation found in `query`.
    pub fn validate(&self, query: &ListQuery) -> Result<(), QueryError> {
        validation::validate(self.registry, self.schema(), query)
    }

    /// Parse, validate and compile in one step
    ///
    /// # Errors
    ///
    /// Returns the first parse, validation or compilation error.
    pub fn compile(&self, params: &QueryParams) -> Result<CompiledQuery, QueryError> {
        let query = self.parse(params)?;
        self.compile_query(&query)
    }

    /// Validate and compile an already parsed query
    ///
    /// # Errors
    ///
    /// Returns the first validation or compilation error.
    pub fn compile_query(&self, query: &ListQuery) -> Result<CompiledQuery, QueryError> {
        self.validate(query)?;
        let ctx = CompileContext {
            registry: self.registry,
            schema: self.schema(),
        };
        let compiled = self.entry.backend.compile(&ctx, query)?;
        tracing::debug!(
            resource = %self.schema().name,
            backend = %self.entry.backend.kind(),
            "Compiled list query"
        );
        Ok(compiled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{AttributeDef, AttributeKind, RelationDef};
    use sea_orm::DatabaseBackend;

    fn products() -> ResourceSchema {
        ResourceSchema::new("products", "products")
            .with_attribute(AttributeDef::new("id", AttributeKind::Numeric))
            .with_relation(RelationDef::to_one("category", "categories", "category_id", "id"))
    }

    fn categories() -> ResourceSchema {
        ResourceSchema::new("categories", "categories")
            .with_attribute(AttributeDef::new("id", AttributeKind::Numeric))
    }

    #[test]
    fn test_build_and_lookup() {
        let registry = SchemaRegistry::builder()
            .register(products(), Backend::relational(DatabaseBackend::Sqlite))
            .register(categories(), Backend::relational(DatabaseBackend::Sqlite))
            .build()
            .unwrap();
        assert!(registry.schema("products").is_some());
        assert_eq!(registry.backend_kind("categories"), Some(BackendKind::Relational));
        assert!(registry.resource("orders").is_none());
        assert_eq!(registry.names().count(), 2);
    }

    #[test]
    fn test_unknown_relation_target() {
        let err = SchemaRegistry::builder()
            .register(products(), Backend::relational(DatabaseBackend::Sqlite))
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::UnknownTarget { target, .. } if target == "categories"));
    }

    #[test]
    fn test_duplicate_resource() {
        let err = SchemaRegistry::builder()
            .register(categories(), Backend::document())
            .register(categories(), Backend::document())
            .build()
            .unwrap_err();
        assert_eq!(err, SchemaError::DuplicateResource("categories".into()));
    }

    #[test]
    fn test_relations_cannot_cross_backends() {
        let err = SchemaRegistry::builder()
            .register(products(), Backend::relational(DatabaseBackend::Sqlite))
            .register(categories(), Backend::document())
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::CrossBackendRelation { .. }));
    }
}
