//! Lookups the filter compiler delegates to the rest of the system.

use std::collections::HashMap;

use crate::ast::Expression;
use crate::error::FilterError;

/// Resolves human-readable references to the identifiers the backend
/// stores. Every call covers a whole value set; implementations must not
/// expect one call per value.
pub trait Resolver: Send + Sync {
    /// Maps project slugs to ids. Unknown slugs are simply absent.
    fn resolve_project_slugs(
        &self,
        organization_id: u64,
        slugs: &[String],
    ) -> Result<HashMap<String, u64>, FilterError>;

    /// Maps qualified issue short ids (`PROJ-1A`) to group ids. Unknown
    /// short ids are simply absent.
    fn resolve_issue_short_ids(
        &self,
        organization_id: u64,
        short_ids: &[String],
    ) -> Result<Vec<u64>, FilterError>;

    /// The most recent release version across the given scope, if any.
    fn resolve_latest_release(
        &self,
        project_ids: &[u64],
        environments: Option<&[String]>,
        organization_id: u64,
    ) -> Result<Option<String>, FilterError>;

    /// Request-scoped computed fields, such as the team key transaction
    /// lookup. Static aliases live in the dataset configuration.
    fn resolve_field_alias(&self, _name: &str) -> Option<Expression> {
        None
    }
}

/// A resolver answering from in-memory tables.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    projects: HashMap<String, u64>,
    issues: HashMap<String, u64>,
    latest_release: Option<String>,
    field_aliases: HashMap<String, Expression>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_project(mut self, slug: &str, id: u64) -> Self {
        self.projects.insert(slug.to_string(), id);
        self
    }

    pub fn with_issue(mut self, short_id: &str, group_id: u64) -> Self {
        self.issues.insert(short_id.to_uppercase(), group_id);
        self
    }

    pub fn with_latest_release(mut self, version: &str) -> Self {
        self.latest_release = Some(version.to_string());
        self
    }

    pub fn with_field_alias(mut self, name: &str, expression: Expression) -> Self {
        self.field_aliases.insert(name.to_string(), expression);
        self
    }
}

impl Resolver for StaticResolver {
    fn resolve_project_slugs(
        &self,
        _organization_id: u64,
        slugs: &[String],
    ) -> Result<HashMap<String, u64>, FilterError> {
        Ok(slugs
            .iter()
            .filter_map(|slug| self.projects.get(slug).map(|id| (slug.clone(), *id)))
            .collect())
    }

    fn resolve_issue_short_ids(
        &self,
        _organization_id: u64,
        short_ids: &[String],
    ) -> Result<Vec<u64>, FilterError> {
        Ok(short_ids
            .iter()
            .filter_map(|short_id| self.issues.get(&short_id.to_uppercase()).copied())
            .collect())
    }

    fn resolve_latest_release(
        &self,
        _project_ids: &[u64],
        _environments: Option<&[String]>,
        _organization_id: u64,
    ) -> Result<Option<String>, FilterError> {
        Ok(self.latest_release.clone())
    }

    fn resolve_field_alias(&self, name: &str) -> Option<Expression> {
        self.field_aliases.get(name).cloned()
    }
}
