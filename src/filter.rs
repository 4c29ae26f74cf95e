//! Filter assembly.
//!
//! Lowers every search term of a request and appends the conditions implied
//! by the request scope: the time window, the project set and the selected
//! environments.

use std::collections::HashMap;

use serde::Serialize;
use tracing::debug;

use crate::ast::{Condition, Op, Value};
use crate::config::DatasetConfig;
use crate::converters::{self, id_values, Converter, Lowering, ENVIRONMENT};
use crate::error::FilterError;
use crate::params::FilterParams;
use crate::resolver::Resolver;
use crate::search::{QueryItem, SearchOperator, SearchTerm};

/// The where-list of a compiled filter, in emission order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledFilter {
    pub conditions: Vec<Condition>,
    /// Projects named by equality project filters. Empty when the query
    /// doesn't narrow the request's project scope.
    pub projects_to_filter: Vec<u64>,
}

impl CompiledFilter {
    /// Joins the where-list into one `AND` node.
    pub fn into_tree(self) -> Condition {
        Condition::And(self.conditions)
    }
}

pub struct FilterCompiler<'a> {
    config: DatasetConfig,
    resolver: &'a dyn Resolver,
    registry: HashMap<&'static str, Converter>,
}

impl<'a> FilterCompiler<'a> {
    pub fn new(resolver: &'a dyn Resolver) -> Self {
        Self::with_config(DatasetConfig::discover(), resolver)
    }

    pub fn with_config(config: DatasetConfig, resolver: &'a dyn Resolver) -> Self {
        Self {
            config,
            resolver,
            registry: converters::registry(),
        }
    }

    pub fn config(&self) -> &DatasetConfig {
        &self.config
    }

    /// Compiles a flat list of terms, all of which must hold.
    pub fn compile(&self, terms: &[SearchTerm], params: &FilterParams) -> Result<CompiledFilter, FilterError> {
        params.validate()?;

        let mut lowering = Lowering::new(&self.config, self.resolver, &self.registry, params);
        let mut conditions = Vec::with_capacity(terms.len() + 4);
        for term in terms {
            if let Some(condition) = lowering.convert(term)? {
                conditions.push(condition);
            }
        }

        let compiled = self.finish(lowering, conditions, params, true)?;
        debug!(
            terms = terms.len(),
            conditions = compiled.conditions.len(),
            "compiled search filter"
        );
        Ok(compiled)
    }

    /// Compiles a query with its boolean structure. `AND` binds tighter than
    /// `OR` and adjacent items are implicitly AND-ed.
    pub fn compile_query(&self, items: &[QueryItem], params: &FilterParams) -> Result<CompiledFilter, FilterError> {
        params.validate()?;
        validate_items(items)?;

        let mut lowering = Lowering::new(&self.config, self.resolver, &self.registry, params);
        let conditions = match lower_or(&mut lowering, items)? {
            Some(Condition::And(children)) => children,
            Some(condition) => vec![condition],
            None => Vec::new(),
        };

        // An equality project filter inside one OR branch says nothing about
        // the other branches.
        let narrow_projects = !contains_or(items);
        let compiled = self.finish(lowering, conditions, params, narrow_projects)?;
        debug!(
            items = items.len(),
            conditions = compiled.conditions.len(),
            narrow_projects,
            "compiled boolean search query"
        );
        Ok(compiled)
    }

    fn finish(
        &self,
        mut lowering: Lowering<'_>,
        mut conditions: Vec<Condition>,
        params: &FilterParams,
        narrow_projects: bool,
    ) -> Result<CompiledFilter, FilterError> {
        let timestamp = lowering.column("timestamp");
        if let Some(start) = params.start {
            conditions.push(Condition::compare(timestamp.clone(), Op::Gte, start));
        }
        if let Some(end) = params.end {
            conditions.push(Condition::compare(timestamp, Op::Lt, end));
        }

        let projects_to_filter: Vec<u64> = if narrow_projects {
            lowering.projects_to_filter.iter().copied().collect()
        } else {
            Vec::new()
        };
        let project_scope = if projects_to_filter.is_empty() {
            &params.project_ids
        } else {
            &projects_to_filter
        };
        let project_scope = Value::List(id_values("project_id", project_scope)?);
        conditions.push(Condition::compare(lowering.column("project_id"), Op::In, project_scope));

        if let Some(environments) = params.environments.as_ref().filter(|e| !e.is_empty()) {
            let term = SearchTerm::new(ENVIRONMENT, SearchOperator::In, environments.clone());
            if let Some(condition) = lowering.convert(&term)? {
                conditions.push(condition);
            }
        }

        Ok(CompiledFilter {
            conditions,
            projects_to_filter,
        })
    }
}

/// Compiles `terms` against the built-in dataset configuration.
pub fn compile_filter(
    terms: &[SearchTerm],
    params: &FilterParams,
    resolver: &dyn Resolver,
) -> Result<CompiledFilter, FilterError> {
    FilterCompiler::new(resolver).compile(terms, params)
}

fn operator_name(item: &QueryItem) -> Option<&'static str> {
    match item {
        QueryItem::And => Some("AND"),
        QueryItem::Or => Some("OR"),
        _ => None,
    }
}

fn validate_items(items: &[QueryItem]) -> Result<(), FilterError> {
    if let Some(operator) = items.first().and_then(operator_name) {
        return Err(FilterError::Parse(format!(
            "Condition is missing on the left side of '{}' operator",
            operator
        )));
    }
    for pair in items.windows(2) {
        if let (Some(left), Some(right)) = (operator_name(&pair[0]), operator_name(&pair[1])) {
            return Err(FilterError::Parse(format!(
                "Missing condition in between two condition operators: '{} {}'",
                left, right
            )));
        }
    }
    if let Some(operator) = items.last().and_then(operator_name) {
        return Err(FilterError::Parse(format!(
            "Condition is missing on the right side of '{}' operator",
            operator
        )));
    }

    for item in items {
        if let QueryItem::Group(inner) = item {
            if inner.is_empty() {
                return Err(FilterError::Parse("Empty parentheses are not allowed".to_string()));
            }
            validate_items(inner)?;
        }
    }
    Ok(())
}

fn contains_or(items: &[QueryItem]) -> bool {
    items.iter().any(|item| match item {
        QueryItem::Or => true,
        QueryItem::Group(inner) => contains_or(inner),
        _ => false,
    })
}

fn lower_or(lowering: &mut Lowering<'_>, items: &[QueryItem]) -> Result<Option<Condition>, FilterError> {
    let mut branches = Vec::new();
    for conjunction in items.split(|item| matches!(item, QueryItem::Or)) {
        match lower_and(lowering, conjunction)? {
            Some(condition) => branches.push(condition),
            // A branch without constraints matches every row.
            None => return Ok(None),
        }
    }
    Ok(if branches.is_empty() {
        None
    } else {
        Some(Condition::or(branches))
    })
}

fn lower_and(lowering: &mut Lowering<'_>, items: &[QueryItem]) -> Result<Option<Condition>, FilterError> {
    let mut children = Vec::new();
    for item in items {
        let condition = match item {
            QueryItem::Term(term) => lowering.convert(term)?,
            QueryItem::Group(inner) => lower_or(lowering, inner)?,
            QueryItem::And | QueryItem::Or => None,
        };
        children.extend(condition);
    }
    Ok(if children.is_empty() {
        None
    } else {
        Some(Condition::and(children))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Expression, Value};
    use crate::resolver::StaticResolver;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    fn params() -> FilterParams {
        FilterParams::new(1, vec![1, 2, 3])
    }

    fn column(name: &str) -> Expression {
        Expression::column(name)
    }

    fn scope(ids: Vec<i64>) -> Condition {
        Condition::compare(column("project_id"), Op::In, ids)
    }

    #[test]
    fn test_simple_terms_with_range() {
        let start = Utc.with_ymd_and_hms(2015, 5, 18, 10, 15, 1).unwrap();
        let end = Utc.with_ymd_and_hms(2015, 5, 19, 10, 15, 1).unwrap();
        let resolver = StaticResolver::new();
        let terms = vec![
            SearchTerm::new("user.email", SearchOperator::Eq, "foo@example.com"),
            SearchTerm::new("release", SearchOperator::Eq, "1.2.1"),
        ];

        let compiled = compile_filter(&terms, &params().with_range(start, end), &resolver).unwrap();
        assert_eq!(
            compiled.conditions,
            vec![
                Condition::compare(column("email"), Op::Eq, "foo@example.com"),
                Condition::compare(column("release"), Op::Eq, "1.2.1"),
                Condition::compare(column("timestamp"), Op::Gte, Value::DateTime(start)),
                Condition::compare(column("timestamp"), Op::Lt, Value::DateTime(end)),
                scope(vec![1, 2, 3]),
            ]
        );
        assert!(compiled.projects_to_filter.is_empty());
    }

    #[test]
    fn test_environment_terms_and_params() {
        let resolver = StaticResolver::new();
        let compiler = FilterCompiler::new(&resolver);

        let terms = vec![SearchTerm::new("environment", SearchOperator::In, vec!["", "prod"])];
        let compiled = compiler.compile(&terms, &params()).unwrap();
        assert_eq!(
            compiled.conditions[0],
            Condition::Or(vec![
                Condition::is_null(column("environment")),
                Condition::compare(column("environment"), Op::Eq, "prod"),
            ])
        );

        let compiled = compiler
            .compile(&[], &params().with_environments(["prod", "dev"]))
            .unwrap();
        assert_eq!(
            compiled.conditions,
            vec![
                scope(vec![1, 2, 3]),
                Condition::compare(column("environment"), Op::In, vec!["dev", "prod"]),
            ]
        );
    }

    #[test]
    fn test_compile_is_deterministic() {
        let resolver = StaticResolver::new().with_project("backend", 2);
        let compiler = FilterCompiler::new(&resolver);
        let terms = vec![
            SearchTerm::new("environment", SearchOperator::In, vec!["prod", "", "dev"]),
            SearchTerm::new("project", SearchOperator::Eq, "backend"),
            SearchTerm::new("browser", SearchOperator::Neq, "chrome").tag(),
        ];

        let first = compiler.compile(&terms, &params()).unwrap();
        let second = compiler.compile(&terms, &params()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_negated_nullable_columns_accept_null() {
        let resolver = StaticResolver::new();
        let terms = vec![
            SearchTerm::new("user.email", SearchOperator::Neq, "foo@example.com"),
            SearchTerm::new("browser", SearchOperator::Neq, "chrome").tag(),
        ];

        let compiled = compile_filter(&terms, &params(), &resolver).unwrap();
        assert_eq!(
            compiled.conditions[0],
            Condition::Or(vec![
                Condition::is_null(column("email")),
                Condition::compare(column("email"), Op::Neq, "foo@example.com"),
            ])
        );
        assert_eq!(
            compiled.conditions[1],
            Condition::compare(column("tags[browser]"), Op::Neq, "chrome")
        );
    }

    #[test]
    fn test_project_filter_narrows_scope() {
        let resolver = StaticResolver::new().with_project("backend", 2);
        let terms = vec![SearchTerm::new("project", SearchOperator::Eq, "backend")];

        let compiled = compile_filter(&terms, &params(), &resolver).unwrap();
        assert_eq!(compiled.projects_to_filter, vec![2]);
        assert_eq!(
            compiled.conditions,
            vec![Condition::compare(column("project_id"), Op::Eq, 2i64), scope(vec![2])]
        );
    }

    #[test]
    fn test_invalid_params() {
        let resolver = StaticResolver::new();
        let result = compile_filter(&[], &FilterParams::new(1, vec![]), &resolver);
        assert!(matches!(result, Err(FilterError::InvalidParams(_))));

        let result = compile_filter(&[], &FilterParams::new(1, vec![1, u64::MAX]), &resolver);
        match result {
            Err(FilterError::InvalidValue { field, .. }) => assert_eq!(field, "project_id"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_boolean_precedence() {
        let resolver = StaticResolver::new();
        let compiler = FilterCompiler::new(&resolver);
        let items = vec![
            QueryItem::from(SearchTerm::new("user.email", SearchOperator::Eq, "a@example.com")),
            QueryItem::Or,
            QueryItem::from(SearchTerm::new("release", SearchOperator::Eq, "1.0")),
            QueryItem::from(SearchTerm::new("dist", SearchOperator::Eq, "2")),
        ];

        let compiled = compiler.compile_query(&items, &params()).unwrap();
        assert_eq!(
            compiled.conditions,
            vec![
                Condition::Or(vec![
                    Condition::compare(column("email"), Op::Eq, "a@example.com"),
                    Condition::And(vec![
                        Condition::compare(column("release"), Op::Eq, "1.0"),
                        Condition::compare(column("dist"), Op::Eq, "2"),
                    ]),
                ]),
                scope(vec![1, 2, 3]),
            ]
        );
    }

    #[test]
    fn test_top_level_and_is_split() {
        let resolver = StaticResolver::new();
        let compiler = FilterCompiler::new(&resolver);
        let items = vec![
            QueryItem::from(SearchTerm::new("release", SearchOperator::Eq, "1.0")),
            QueryItem::And,
            QueryItem::Group(vec![
                QueryItem::from(SearchTerm::new("dist", SearchOperator::Eq, "1")),
                QueryItem::Or,
                QueryItem::from(SearchTerm::new("dist", SearchOperator::Eq, "2")),
            ]),
        ];

        let compiled = compiler.compile_query(&items, &params()).unwrap();
        assert_eq!(compiled.conditions.len(), 3);
        assert_eq!(
            compiled.conditions[1].to_string(),
            "(dist = '1' OR dist = '2')"
        );
    }

    #[test]
    fn test_or_query_does_not_narrow_projects() {
        let resolver = StaticResolver::new().with_project("backend", 2);
        let compiler = FilterCompiler::new(&resolver);
        let items = vec![
            QueryItem::from(SearchTerm::new("project", SearchOperator::Eq, "backend")),
            QueryItem::Or,
            QueryItem::from(SearchTerm::new("release", SearchOperator::Eq, "1.0")),
        ];

        let compiled = compiler.compile_query(&items, &params()).unwrap();
        assert!(compiled.projects_to_filter.is_empty());
        assert_eq!(compiled.conditions.last(), Some(&scope(vec![1, 2, 3])));
    }

    #[test]
    fn test_malformed_queries() {
        let resolver = StaticResolver::new();
        let compiler = FilterCompiler::new(&resolver);
        let term = || QueryItem::from(SearchTerm::new("release", SearchOperator::Eq, "1.0"));

        let cases = vec![
            (vec![QueryItem::Or, term()], "Condition is missing on the left side of 'OR' operator"),
            (vec![term(), QueryItem::And], "Condition is missing on the right side of 'AND' operator"),
            (
                vec![term(), QueryItem::And, QueryItem::Or, term()],
                "Missing condition in between two condition operators: 'AND OR'",
            ),
            (vec![term(), QueryItem::Group(vec![])], "Empty parentheses are not allowed"),
        ];
        for (items, message) in cases {
            match compiler.compile_query(&items, &params()) {
                Err(FilterError::Parse(actual)) => assert_eq!(actual, message),
                other => panic!("expected a parse error for {:?}, got {:?}", items, other),
            }
        }
    }

    #[test]
    fn test_into_tree() {
        let resolver = StaticResolver::new();
        let terms = vec![SearchTerm::new("release", SearchOperator::Eq, "1.0")];
        let tree = compile_filter(&terms, &params(), &resolver).unwrap().into_tree();
        assert_eq!(
            tree.to_string(),
            "(release = '1.0' AND project_id IN (1, 2, 3))"
        );
    }
}
