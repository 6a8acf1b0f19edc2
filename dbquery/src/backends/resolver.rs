//! Relation path resolution shared by every backend.
//!
//! The resolver walks `relation__relation__attribute` paths through the registry
//! and records one [`JoinPlan`] per distinct relation path. Backends turn plans
//! into their native construct (SQL join, `$lookup`, nested path) through
//! [`QueryCompiler::resolve_relation`](super::QueryCompiler::resolve_relation).

use crate::errors::QueryError;
use crate::filtering::joined::RelationFetchSpec;
use crate::filtering::params::{AttributePath, PARAM_RELATIONS, PATH_SEPARATOR};
use crate::registry::SchemaRegistry;
use crate::schema::{AttributeDef, RelationDef, ResourceSchema};
use std::collections::HashMap;

pub const DEFAULT_ALIAS_PREFIX: &str = "rel_";

/// Index of a join within one resolver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JoinHandle(usize);

impl JoinHandle {
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// One traversed relation
#[derive(Debug, Clone)]
pub struct JoinPlan<'a> {
    /// Relation names from the root, inclusive
    pub path: Vec<String>,
    /// Unique alias for this path within the compiled query
    pub alias: String,
    /// Join this one hangs off; `None` for relations of the root
    pub parent: Option<JoinHandle>,
    pub relation: &'a RelationDef,
    pub target: &'a ResourceSchema,
}

impl JoinPlan<'_> {
    #[must_use]
    pub fn label(&self) -> String {
        self.path.join(PATH_SEPARATOR)
    }
}

/// Attribute reached through zero or more joins
#[derive(Debug, Clone, Copy)]
pub struct ResolvedAttribute<'a> {
    pub attribute: &'a AttributeDef,
    pub owner: &'a ResourceSchema,
    pub join: Option<JoinHandle>,
}

/// Resolves relation paths for a single compiled query, caching one join per path
pub struct RelationResolver<'a> {
    registry: &'a SchemaRegistry,
    root: &'a ResourceSchema,
    prefix: String,
    joins: Vec<JoinPlan<'a>>,
    cache: HashMap<Vec<String>, JoinHandle>,
}

impl<'a> RelationResolver<'a> {
    #[must_use]
    pub fn new(registry: &'a SchemaRegistry, root: &'a ResourceSchema) -> Self {
        Self {
            registry,
            root,
            prefix: DEFAULT_ALIAS_PREFIX.to_string(),
            joins: Vec::new(),
            cache: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    #[must_use]
    pub fn root(&self) -> &'a ResourceSchema {
        self.root
    }

    /// Resolve (and register) the joins for a chain of relation names
    ///
    /// # Errors
    ///
    /// Returns `InvalidRelationPath` naming the first segment that is not a
    /// relation of the resource reached so far.
    pub fn resolve(
        &mut self,
        param: &str,
        relations: &[String],
    ) -> Result<(Option<JoinHandle>, &'a ResourceSchema), QueryError> {
        let mut current = self.root;
        let mut parent = None;

        for (depth, segment) in relations.iter().enumerate() {
            let relation = current
                .relation(segment)
                .ok_or_else(|| QueryError::invalid_relation_path(param, segment))?;
            let target = self
                .registry
                .schema(&relation.target)
                .ok_or_else(|| QueryError::invalid_relation_path(param, segment))?;

            let key = relations[..=depth].to_vec();
            let handle = match self.cache.get(&key) {
                Some(handle) => *handle,
                None => {
                    let handle = JoinHandle(self.joins.len());
                    tracing::trace!(path = %key.join(PATH_SEPARATOR), "Registering join");
                    self.joins.push(JoinPlan {
                        alias: format!("{}{}", self.prefix, key.join(PATH_SEPARATOR)),
                        path: key.clone(),
                        parent,
                        relation,
                        target,
                    });
                    self.cache.insert(key, handle);
                    handle
                }
            };

            parent = Some(handle);
            current = target;
        }

        Ok((parent, current))
    }

    /// Resolve a full attribute path
    ///
    /// # Errors
    ///
    /// `InvalidRelationPath` for a bad relation segment, `UnknownAttribute` when
    /// the final segment is not an attribute of the resource reached.
    pub fn resolve_attribute(
        &mut self,
        param: &str,
        path: &AttributePath,
    ) -> Result<ResolvedAttribute<'a>, QueryError> {
        let (join, owner) = self.resolve(param, path.relations())?;
        let attribute = owner
            .attribute(path.attribute())
            .ok_or_else(|| QueryError::unknown_attribute(param, path.attribute()))?;
        Ok(ResolvedAttribute {
            attribute,
            owner,
            join,
        })
    }

    /// Relations of the root to load alongside each row; `_all` is one level deep
    ///
    /// # Errors
    ///
    /// Returns `InvalidRelationPath` for a name that is not a relation of the root.
    pub fn resolve_fetch(&self, spec: &RelationFetchSpec) -> Result<Vec<&'a RelationDef>, QueryError> {
        match spec {
            RelationFetchSpec::None => Ok(Vec::new()),
            RelationFetchSpec::All => Ok(self.root.relations.iter().collect()),
            RelationFetchSpec::Named(names) => names
                .iter()
                .map(|name| {
                    self.root
                        .relation(name)
                        .ok_or_else(|| QueryError::invalid_relation_path(PARAM_RELATIONS, name))
                })
                .collect(),
        }
    }

    #[must_use]
    pub fn joins(&self) -> &[JoinPlan<'a>] {
        &self.joins
    }

    /// Handles of every registered join, parents before children
    pub fn handles(&self) -> impl Iterator<Item = JoinHandle> + use<'a> {
        (0..self.joins.len()).map(JoinHandle)
    }

    #[must_use]
    pub fn join(&self, handle: JoinHandle) -> &JoinPlan<'a> {
        &self.joins[handle.0]
    }

    /// Whether any join along the chain ending at `handle` fans out
    #[must_use]
    pub fn is_to_many(&self, handle: JoinHandle) -> bool {
        let plan = self.join(handle);
        plan.relation.many || plan.parent.is_some_and(|parent| self.is_to_many(parent))
    }

    #[must_use]
    pub fn has_to_many(&self) -> bool {
        self.joins.iter().any(|plan| plan.relation.many)
    }
}
