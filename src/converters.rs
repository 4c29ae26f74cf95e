//! Lowering of a single search term into a condition.
//!
//! Fields with backend-specific semantics are looked up in a flat
//! name → converter registry. Everything else goes through
//! [`Lowering::default_condition`], which handles column and alias
//! resolution, tags, array fields, existence checks, null safety and
//! wildcards.

use std::borrow::Cow;
use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use tracing::{trace, warn};
use uuid::Uuid;

use crate::ast::{Condition, Expression, Op, Value};
use crate::config::DatasetConfig;
use crate::error::FilterError;
use crate::params::FilterParams;
use crate::resolver::Resolver;
use crate::search::{wildcard_to_like, wildcard_to_regex, SearchOperator, SearchTerm};

pub const ENVIRONMENT: &str = "environment";
pub const MESSAGE: &str = "message";
pub const TRANSACTION_STATUS: &str = "transaction.status";
pub const ISSUE: &str = "issue";
pub const ISSUE_ID: &str = "issue.id";
pub const USER_DISPLAY: &str = "user.display";
pub const ERROR_HANDLED: &str = "error.handled";
pub const ERROR_UNHANDLED: &str = "error.unhandled";
pub const TEAM_KEY_TRANSACTION: &str = "team_key_transaction";
pub const PROJECT: &str = "project";
pub const PROJECT_NAME: &str = "project.name";
pub const PROJECT_ID: &str = "project.id";
pub const RELEASE: &str = "release";

/// Keys that only carry request scope and never become conditions.
const NO_CONVERSION_FIELDS: &[&str] = &["start", "end"];

/// Internal columns a user can only reach as tags.
const SKIP_FILTER_RESOLUTION: &[&str] = &["group_id"];

/// Timestamp fields compared as datetimes. Every other field receives
/// datetimes as integer milliseconds.
const DATETIME_FIELDS: &[&str] = &["timestamp", "timestamp.to_hour", "timestamp.to_day"];

/// Span status names and the codes stored in `transaction_status`.
const SPAN_STATUS_CODES: &[(&str, i64)] = &[
    ("ok", 0),
    ("cancelled", 1),
    ("unknown", 2),
    ("unknown_error", 2),
    ("invalid_argument", 3),
    ("deadline_exceeded", 4),
    ("not_found", 5),
    ("already_exists", 6),
    ("permission_denied", 7),
    ("resource_exhausted", 8),
    ("failed_precondition", 9),
    ("aborted", 10),
    ("out_of_range", 11),
    ("unimplemented", 12),
    ("internal_error", 13),
    ("unavailable", 14),
    ("data_loss", 15),
    ("unauthenticated", 16),
];

pub(crate) type Converter =
    fn(&mut Lowering<'_>, &SearchTerm) -> Result<Option<Condition>, FilterError>;

pub(crate) fn registry() -> HashMap<&'static str, Converter> {
    let mut converters: HashMap<&'static str, Converter> = HashMap::new();
    converters.insert(ENVIRONMENT, environment_converter);
    converters.insert(MESSAGE, message_converter);
    converters.insert(TRANSACTION_STATUS, transaction_status_converter);
    converters.insert(ISSUE, issue_converter);
    converters.insert(ISSUE_ID, issue_id_converter);
    converters.insert(USER_DISPLAY, user_display_converter);
    converters.insert(ERROR_HANDLED, error_handled_converter);
    converters.insert(ERROR_UNHANDLED, error_unhandled_converter);
    converters.insert(TEAM_KEY_TRANSACTION, key_transaction_converter);
    converters.insert(PROJECT, project_slug_converter);
    converters.insert(PROJECT_NAME, project_slug_converter);
    converters.insert(RELEASE, release_converter);
    converters
}

/// Per-compile lowering state.
pub(crate) struct Lowering<'c> {
    config: &'c DatasetConfig,
    resolver: &'c dyn Resolver,
    registry: &'c HashMap<&'static str, Converter>,
    params: &'c FilterParams,
    /// Project ids named by equality project filters.
    pub(crate) projects_to_filter: BTreeSet<u64>,
}

impl<'c> Lowering<'c> {
    pub(crate) fn new(
        config: &'c DatasetConfig,
        resolver: &'c dyn Resolver,
        registry: &'c HashMap<&'static str, Converter>,
        params: &'c FilterParams,
    ) -> Self {
        Self {
            config,
            resolver,
            registry,
            params,
            projects_to_filter: BTreeSet::new(),
        }
    }

    /// Lowers one term. `None` means the term constrains nothing.
    pub(crate) fn convert(&mut self, term: &SearchTerm) -> Result<Option<Condition>, FilterError> {
        if NO_CONVERSION_FIELDS.contains(&term.key.as_str()) {
            return Ok(None);
        }

        trace!(key = %term.key, operator = ?term.operator, "lowering search term");
        match self.registry.get(term.key.as_str()).copied() {
            Some(converter) => converter(self, term),
            None => self.default_condition(term),
        }
    }

    /// The column behind `name`, falling back to the name itself.
    pub(crate) fn column(&self, name: &str) -> Expression {
        Expression::Column(self.config.resolve_column(name).unwrap_or_else(|| name.to_string()))
    }

    fn resolve_alias(&self, name: &str) -> Option<Expression> {
        self.resolver
            .resolve_field_alias(name)
            .or_else(|| self.config.field_alias(name).cloned())
    }

    fn resolve_field(&self, name: &str, is_tag: bool) -> Result<Expression, FilterError> {
        if let Some(expression) = self.resolve_alias(name) {
            return Ok(expression);
        }
        if let Some(column) = self.config.resolve_column(name) {
            return Ok(Expression::Column(column));
        }
        if is_tag {
            return Ok(Expression::Column(format!("tags[{}]", name)));
        }
        Err(FilterError::UnsupportedField(name.to_string()))
    }

    pub(crate) fn default_condition(&mut self, term: &SearchTerm) -> Result<Option<Condition>, FilterError> {
        let name: Cow<'_, str> = if SKIP_FILTER_RESOLUTION.contains(&term.key.as_str()) {
            Cow::Owned(format!("tags[{}]", term.key))
        } else {
            Cow::Borrowed(term.key.as_str())
        };
        let operator = term.operator;
        let lhs = self.resolve_field(&name, term.is_tag)?;

        if self.config.is_array_field(&name) {
            if let Some(condition) = array_condition(&lhs, term)? {
                return Ok(Some(condition));
            }
        }

        let mut value = term.value.clone();
        if name == "id" || name == "trace" {
            value = normalize_event_ids(&name, term)?;
        }
        if DATETIME_FIELDS.contains(&&*name) {
            if !term.is_wildcard && !term.is_has_query() {
                value = parse_timestamps(&name, &value)?;
            }
        } else {
            value = datetimes_to_millis(value);
        }

        // Tag and context values are stored as strings and compared directly.
        let is_tag_column = lhs
            .column_name()
            .map_or(false, |column| column.starts_with("tags[") || column.starts_with("contexts["));
        if is_tag_column && !term.is_in_filter() && !matches!(value, Value::String(_)) {
            value = Value::String(value.to_string());
        }

        if matches!(operator, SearchOperator::Eq | SearchOperator::Neq) && value.is_empty_string() {
            if is_tag_column || self.config.is_non_nullable(&name) {
                return Ok(Some(Condition::compare(lhs, operator.as_op(), value)));
            }
            return Ok(Some(Condition::compare(
                Expression::function("isNull", vec![lhs]),
                operator.as_op(),
                1i64,
            )));
        }

        // `col != x` is null rather than true when col is null, so negated
        // comparisons on nullable columns also accept the null rows.
        let null_check = if operator.is_negation()
            && !term.is_tag
            && !is_tag_column
            && !self.config.is_non_nullable(&name)
        {
            Some(Condition::is_null(lhs.clone()))
        } else {
            None
        };

        let condition = if term.is_wildcard {
            let pattern = wildcard_pattern(&name, &value)?;
            Condition::compare(
                Expression::function(
                    "match",
                    vec![lhs, Expression::literal(format!("(?i){}", wildcard_to_regex(pattern, true)))],
                ),
                wildcard_op(&name, operator)?,
                1i64,
            )
        } else {
            Condition::compare(lhs, operator.as_op(), value)
        };

        Ok(Some(match null_check {
            Some(null_check) => Condition::Or(vec![null_check, condition]),
            None => condition,
        }))
    }
}

fn array_condition(lhs: &Expression, term: &SearchTerm) -> Result<Option<Condition>, FilterError> {
    if term.is_wildcard {
        let pattern = wildcard_pattern(&term.key, &term.value)?;
        let op = match term.operator {
            SearchOperator::Eq => Op::Like,
            SearchOperator::Neq => Op::NotLike,
            other => return Err(unsupported_wildcard_operator(&term.key, other)),
        };
        return Ok(Some(Condition::compare(lhs.clone(), op, wildcard_to_like(pattern))));
    }

    if term.is_in_filter() {
        let op = if term.operator == SearchOperator::In { Op::Eq } else { Op::Neq };
        return Ok(Some(Condition::compare(
            Expression::function("hasAny", vec![lhs.clone(), Expression::literal(term.value.clone())]),
            op,
            1i64,
        )));
    }

    if term.is_has_query() && matches!(term.operator, SearchOperator::Eq | SearchOperator::Neq) {
        let op = if term.operator == SearchOperator::Neq { Op::Eq } else { Op::Neq };
        return Ok(Some(Condition::compare(
            Expression::function("notEmpty", vec![lhs.clone()]),
            op,
            1i64,
        )));
    }

    Ok(None)
}

fn wildcard_pattern<'v>(field: &str, value: &'v Value) -> Result<&'v str, FilterError> {
    value
        .as_str()
        .ok_or_else(|| FilterError::invalid_value(field, "wildcard searches need a single string value"))
}

fn wildcard_op(field: &str, operator: SearchOperator) -> Result<Op, FilterError> {
    match operator {
        SearchOperator::Eq => Ok(Op::Eq),
        SearchOperator::Neq => Ok(Op::Neq),
        other => Err(unsupported_wildcard_operator(field, other)),
    }
}

fn unsupported_wildcard_operator(field: &str, operator: SearchOperator) -> FilterError {
    FilterError::invalid_value(
        field,
        format!("wildcard searches do not support the {} operator", operator.as_op().as_str()),
    )
}

/// Applies `f` to a scalar or to every element of a list, keeping the shape.
fn map_values(
    value: &Value,
    mut f: impl FnMut(&Value) -> Result<Value, FilterError>,
) -> Result<Value, FilterError> {
    match value {
        Value::List(values) => Ok(Value::List(values.iter().map(&mut f).collect::<Result<_, _>>()?)),
        scalar => f(scalar),
    }
}

fn datetimes_to_millis(value: Value) -> Value {
    match value {
        Value::DateTime(dt) => Value::Int(dt.timestamp() * 1000),
        Value::List(values) => Value::List(values.into_iter().map(datetimes_to_millis).collect()),
        other => other,
    }
}

/// Parses RFC 3339 strings on timestamp fields; unparsable strings are
/// rejected.
fn parse_timestamps(field: &str, value: &Value) -> Result<Value, FilterError> {
    map_values(value, |value| match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| Value::DateTime(dt.with_timezone(&Utc)))
            .map_err(|_| FilterError::invalid_value(field, format!("`{}` is not a valid timestamp", s))),
        other => Ok(other.clone()),
    })
}

/// Converts ids to values, rejecting the ones the backend's signed
/// columns cannot hold.
pub(crate) fn id_values(field: &str, ids: &[u64]) -> Result<Vec<Value>, FilterError> {
    ids.iter()
        .map(|&id| {
            i64::try_from(id)
                .map(Value::Int)
                .map_err(|_| FilterError::invalid_value(field, format!("{} is out of range", id)))
        })
        .collect()
}

/// Event and trace ids must be UUIDs; they are compared in their 32 hex
/// digit form.
fn normalize_event_ids(field: &str, term: &SearchTerm) -> Result<Value, FilterError> {
    if term.is_wildcard {
        if field == "id" {
            return Err(FilterError::invalid_value(
                field,
                "wildcard conditions are not permitted on the `id` field",
            ));
        }
        return Ok(term.value.clone());
    }
    if term.is_has_query() {
        return Ok(term.value.clone());
    }

    map_values(&term.value, |value| {
        value
            .as_str()
            .and_then(|s| Uuid::try_parse(s).ok())
            .map(|id| Value::String(id.simple().to_string()))
            .ok_or_else(|| {
                FilterError::invalid_value(field, format!("`{}` is not a valid event id", value))
            })
    })
}

fn environment_converter(lowering: &mut Lowering<'_>, term: &SearchTerm) -> Result<Option<Condition>, FilterError> {
    let mut values: Vec<String> = term.value.as_slice().iter().map(|v| v.to_string()).collect();
    values.sort();
    values.dedup();

    let environment = lowering.column(ENVIRONMENT);
    let equality = term.operator.is_equality();
    let mut conditions = Vec::new();

    // The "no environment" environment is stored as null.
    if let Some(position) = values.iter().position(|v| v.is_empty()) {
        values.remove(position);
        conditions.push(if equality {
            Condition::is_null(environment.clone())
        } else {
            Condition::is_not_null(environment.clone())
        });
    }

    match values.len() {
        0 => {}
        1 => {
            let op = if equality { Op::Eq } else { Op::Neq };
            conditions.push(Condition::compare(environment, op, values.remove(0)));
        }
        _ => {
            let op = if equality { Op::In } else { Op::NotIn };
            conditions.push(Condition::compare(environment, op, values));
        }
    }

    Ok(match conditions.len() {
        0 => None,
        _ if equality => Some(Condition::or(conditions)),
        _ => Some(Condition::and(conditions)),
    })
}

fn message_converter(lowering: &mut Lowering<'_>, term: &SearchTerm) -> Result<Option<Condition>, FilterError> {
    let message = lowering.column(MESSAGE);

    if term.is_wildcard {
        // Unanchored: the pattern may match anywhere in the message.
        let pattern = wildcard_pattern(MESSAGE, &term.value)?;
        return Ok(Some(Condition::compare(
            Expression::function(
                "match",
                vec![message, Expression::literal(format!("(?i){}", wildcard_to_regex(pattern, false)))],
            ),
            wildcard_op(MESSAGE, term.operator)?,
            1i64,
        )));
    }

    if term.is_has_query() {
        return Ok(Some(Condition::compare(
            Expression::function("equals", vec![message, Expression::literal("")]),
            term.operator.as_op(),
            1i64,
        )));
    }

    // Position lookups return 0 when the needle is absent, so a match is
    // "position != 0" and the operator flips.
    let op = if term.operator.is_equality() { Op::Neq } else { Op::Eq };
    let search = if term.is_in_filter() {
        let needles: Vec<String> = term.value.as_slice().iter().map(|v| v.to_string()).collect();
        Expression::function(
            "multiSearchFirstPositionCaseInsensitive",
            vec![message, Expression::literal(needles)],
        )
    } else {
        Expression::function(
            "positionCaseInsensitive",
            vec![message, Expression::literal(term.value.to_string())],
        )
    };
    Ok(Some(Condition::compare(search, op, 0i64)))
}

fn transaction_status_converter(
    lowering: &mut Lowering<'_>,
    term: &SearchTerm,
) -> Result<Option<Condition>, FilterError> {
    if term.is_has_query() {
        let status = lowering.column(TRANSACTION_STATUS);
        return Ok(Some(if term.operator == SearchOperator::Eq {
            Condition::is_null(status)
        } else {
            Condition::is_not_null(status)
        }));
    }

    let codes = map_values(&term.value, |value| {
        value
            .as_str()
            .and_then(|name| SPAN_STATUS_CODES.iter().find(|(status, _)| *status == name))
            .map(|(_, code)| Value::Int(*code))
            .ok_or_else(|| {
                let accepted: Vec<&str> = SPAN_STATUS_CODES.iter().map(|(name, _)| *name).collect();
                FilterError::invalid_value(
                    TRANSACTION_STATUS,
                    format!("`{}` is not a status, accepted values are {}", value, accepted.join(", ")),
                )
            })
    })?;

    lowering.default_condition(&term.rewrite(TRANSACTION_STATUS, codes))
}

/// Events without an issue store either null or 0 as their group id, so
/// the column is always coalesced to 0 before comparing.
fn issue_id_converter(lowering: &mut Lowering<'_>, term: &SearchTerm) -> Result<Option<Condition>, FilterError> {
    let group_id = lowering.column(ISSUE_ID);

    let rhs = map_values(&term.value, |value| {
        if value.is_empty_string() {
            return Ok(Value::Int(0));
        }
        value
            .as_int()
            .map(Value::Int)
            .ok_or_else(|| FilterError::invalid_value(ISSUE_ID, format!("`{}` is not a valid issue id", value)))
    })?;

    let lhs = Expression::function("ifNull", vec![group_id, Expression::literal(0i64)]);
    Ok(Some(Condition::compare(lhs, term.operator.as_op(), rhs)))
}

fn issue_converter(lowering: &mut Lowering<'_>, term: &SearchTerm) -> Result<Option<Condition>, FilterError> {
    let values = term.value.as_slice();

    // `unknown` stands for events without an issue.
    let is_no_issue = |v: &Value| v.is_empty_string() || v.as_str() == Some("unknown");
    let mut short_ids: Vec<String> = values
        .iter()
        .filter(|v| !is_no_issue(*v))
        .map(|v| v.to_string())
        .collect();
    short_ids.sort();
    short_ids.dedup();

    let mut filter_values: Vec<Value> = values
        .iter()
        .filter(|v| is_no_issue(*v))
        .map(|_| Value::from(""))
        .collect();

    if !short_ids.is_empty() {
        let mut group_ids = lowering
            .resolver
            .resolve_issue_short_ids(lowering.params.organization_id, &short_ids)?;
        if group_ids.len() < short_ids.len() {
            if term.operator.is_equality() {
                return Err(FilterError::Unresolved(format!(
                    "Invalid value '{}' for 'issue:' filter",
                    short_ids.join(", ")
                )));
            }
            warn!(short_ids = ?short_ids, "ignoring unresolved issues in negated issue filter");
        }
        group_ids.sort_unstable();
        group_ids.dedup();
        filter_values.extend(id_values(ISSUE, &group_ids)?);
    }

    if filter_values.is_empty() {
        return Ok(None);
    }
    let value = if term.is_in_filter() {
        Value::List(filter_values)
    } else {
        filter_values.remove(0)
    };
    issue_id_converter(lowering, &term.rewrite(ISSUE_ID, value))
}

fn negated_flag_term(field: &str, term: &SearchTerm) -> Result<bool, FilterError> {
    match term.operator {
        SearchOperator::Eq => Ok(false),
        SearchOperator::Neq => Ok(true),
        other => Err(FilterError::invalid_value(
            field,
            format!("the {} operator is not supported", other.as_op().as_str()),
        )),
    }
}

fn flag_value(field: &str, value: &Value) -> Result<bool, FilterError> {
    value
        .as_flag()
        .ok_or_else(|| FilterError::invalid_value(field, "accepted values are 1, 0"))
}

fn handled_condition(handled: bool) -> Condition {
    let function = if handled { "isHandled" } else { "notHandled" };
    Condition::compare(Expression::function(function, vec![]), Op::Eq, 1i64)
}

fn error_handled_converter(_: &mut Lowering<'_>, term: &SearchTerm) -> Result<Option<Condition>, FilterError> {
    let negated = negated_flag_term(ERROR_HANDLED, term)?;

    // An event without mechanism data counts as handled.
    if term.is_has_query() {
        let output = if negated { 0i64 } else { 1 };
        return Ok(Some(Condition::compare(Expression::function("isHandled", vec![]), Op::Eq, output)));
    }

    let handled = flag_value(ERROR_HANDLED, &term.value)?;
    Ok(Some(handled_condition(handled != negated)))
}

fn error_unhandled_converter(_: &mut Lowering<'_>, term: &SearchTerm) -> Result<Option<Condition>, FilterError> {
    let negated = negated_flag_term(ERROR_UNHANDLED, term)?;

    if term.is_has_query() {
        let output = if negated { 0i64 } else { 1 };
        return Ok(Some(Condition::compare(Expression::function("notHandled", vec![]), Op::Eq, output)));
    }

    let unhandled = flag_value(ERROR_UNHANDLED, &term.value)?;
    Ok(Some(handled_condition(unhandled == negated)))
}

fn user_display_converter(lowering: &mut Lowering<'_>, term: &SearchTerm) -> Result<Option<Condition>, FilterError> {
    let user_display = lowering
        .resolve_alias(USER_DISPLAY)
        .ok_or_else(|| FilterError::UnsupportedField(USER_DISPLAY.to_string()))?;
    let op = term.operator.as_op();

    if term.is_has_query() {
        return Ok(Some(Condition::compare(
            Expression::function("isNull", vec![user_display]),
            op,
            1i64,
        )));
    }

    if term.is_wildcard {
        let pattern = wildcard_pattern(USER_DISPLAY, &term.value)?;
        return Ok(Some(Condition::compare(
            Expression::function(
                "match",
                vec![user_display, Expression::literal(format!("(?i){}", wildcard_to_regex(pattern, true)))],
            ),
            wildcard_op(USER_DISPLAY, term.operator)?,
            1i64,
        )));
    }

    Ok(Some(Condition::compare(user_display, op, term.value.clone())))
}

fn key_transaction_converter(
    lowering: &mut Lowering<'_>,
    term: &SearchTerm,
) -> Result<Option<Condition>, FilterError> {
    let key_transaction = lowering
        .resolve_alias(TEAM_KEY_TRANSACTION)
        .ok_or_else(|| FilterError::UnsupportedField(TEAM_KEY_TRANSACTION.to_string()))?;
    let negated = negated_flag_term(TEAM_KEY_TRANSACTION, term)?;

    if term.is_has_query() {
        let op = if negated { Op::Neq } else { Op::Eq };
        return Ok(Some(Condition::compare(key_transaction, op, 0i64)));
    }

    let is_key = flag_value(TEAM_KEY_TRANSACTION, &term.value)?;
    let output = if is_key != negated { 1i64 } else { 0 };
    Ok(Some(Condition::compare(key_transaction, Op::Eq, output)))
}

fn project_slug_converter(lowering: &mut Lowering<'_>, term: &SearchTerm) -> Result<Option<Condition>, FilterError> {
    let mut slugs: Vec<String> = term.value.as_slice().iter().map(|v| v.to_string()).collect();
    slugs.sort();
    slugs.dedup();

    let projects = lowering
        .resolver
        .resolve_project_slugs(lowering.params.organization_id, &slugs)?;

    let missing: Vec<&str> = slugs
        .iter()
        .filter(|slug| !projects.contains_key(slug.as_str()))
        .map(String::as_str)
        .collect();
    if !missing.is_empty() {
        if term.operator.is_equality() {
            return Err(FilterError::Unresolved(format!(
                "Invalid query. Project(s) {} do not exist or are not actively selected.",
                missing.join(", ")
            )));
        }
        // Not being equal to a project that doesn't exist always holds.
        warn!(missing = ?missing, "ignoring unknown projects in negated project filter");
    }

    let mut project_ids: Vec<u64> = projects.into_values().collect();
    project_ids.sort_unstable();
    project_ids.dedup();
    if project_ids.is_empty() {
        return Ok(None);
    }

    if term.operator.is_equality() {
        lowering.projects_to_filter.extend(project_ids.iter().copied());
    }
    let mut values = id_values(PROJECT_ID, &project_ids)?;
    let value = if term.is_in_filter() {
        Value::List(values)
    } else {
        values.remove(0)
    };
    lowering.default_condition(&term.rewrite(PROJECT_ID, value))
}

fn release_converter(lowering: &mut Lowering<'_>, term: &SearchTerm) -> Result<Option<Condition>, FilterError> {
    let is_latest = |v: &Value| v.as_str() == Some("latest");
    if term.is_wildcard || !term.value.as_slice().iter().any(is_latest) {
        return lowering.default_condition(term);
    }

    let params = lowering.params;
    let latest = lowering.resolver.resolve_latest_release(
        &params.project_ids,
        params.environments.as_deref(),
        params.organization_id,
    )?;

    let mut values: Vec<Value> = match latest {
        Some(version) => term
            .value
            .as_slice()
            .iter()
            .map(|v| if is_latest(v) { Value::from(version.as_str()) } else { v.clone() })
            .collect(),
        None if term.operator.is_equality() => {
            return Err(FilterError::Unresolved(
                "Release 'latest' could not be resolved: no releases exist in the selected projects"
                    .to_string(),
            ))
        }
        None => {
            warn!("ignoring unresolved latest release in negated release filter");
            term.value.as_slice().iter().filter(|v| !is_latest(*v)).cloned().collect()
        }
    };

    if values.is_empty() {
        return Ok(None);
    }
    let value = if term.value.is_list() {
        Value::List(values)
    } else {
        values.remove(0)
    };
    lowering.default_condition(&SearchTerm {
        value,
        ..term.clone()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::StaticResolver;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    fn lower_with(
        resolver: &StaticResolver,
        term: SearchTerm,
    ) -> Result<(Option<Condition>, Vec<u64>), FilterError> {
        let config = DatasetConfig::discover();
        let registry = registry();
        let params = FilterParams::new(1, vec![1, 2, 3]);
        let mut lowering = Lowering::new(&config, resolver, &registry, &params);
        let condition = lowering.convert(&term)?;
        Ok((condition, lowering.projects_to_filter.into_iter().collect()))
    }

    fn lower(term: SearchTerm) -> Result<Option<Condition>, FilterError> {
        lower_with(&StaticResolver::new(), term).map(|(condition, _)| condition)
    }

    fn rendered(term: SearchTerm) -> String {
        lower(term).unwrap().unwrap().to_string()
    }

    #[test]
    fn test_environment() {
        assert_eq!(
            rendered(SearchTerm::new("environment", SearchOperator::In, vec!["", "prod"])),
            "(environment IS NULL OR environment = 'prod')"
        );
        assert_eq!(
            rendered(SearchTerm::new("environment", SearchOperator::In, vec!["prod", "dev", "prod"])),
            "environment IN ('dev', 'prod')"
        );
        assert_eq!(
            rendered(SearchTerm::new("environment", SearchOperator::Neq, "")),
            "environment IS NOT NULL"
        );
        assert_eq!(
            rendered(SearchTerm::new("environment", SearchOperator::NotIn, vec!["", "prod"])),
            "(environment IS NOT NULL AND environment != 'prod')"
        );
    }

    #[test]
    fn test_message() {
        assert_eq!(
            rendered(SearchTerm::new("message", SearchOperator::Eq, "Hello")),
            "positionCaseInsensitive(message, 'Hello') != 0"
        );
        assert_eq!(
            rendered(SearchTerm::new("message", SearchOperator::Neq, "Hello")),
            "positionCaseInsensitive(message, 'Hello') = 0"
        );
        assert_eq!(
            rendered(SearchTerm::new("message", SearchOperator::In, vec!["a", "b"])),
            "multiSearchFirstPositionCaseInsensitive(message, ('a', 'b')) != 0"
        );
        assert_eq!(
            rendered(SearchTerm::new("message", SearchOperator::Eq, "*oops*").wildcard()),
            "match(message, '(?i).*oops.*') = 1"
        );
    }

    #[test]
    fn test_message_existence() {
        // An empty needle would match every message.
        assert_eq!(
            rendered(SearchTerm::new("message", SearchOperator::Eq, "")),
            "equals(message, '') = 1"
        );
        assert_eq!(
            rendered(SearchTerm::new("message", SearchOperator::Neq, "")),
            "equals(message, '') != 1"
        );
    }

    #[test]
    fn test_transaction_status() {
        assert_eq!(
            rendered(SearchTerm::new("transaction.status", SearchOperator::Eq, "ok")),
            "transaction_status = 0"
        );
        assert_eq!(
            rendered(SearchTerm::new("transaction.status", SearchOperator::Neq, "cancelled")),
            "(transaction_status IS NULL OR transaction_status != 1)"
        );
        assert_eq!(
            rendered(SearchTerm::new("transaction.status", SearchOperator::In, vec!["unknown", "unknown_error"])),
            "transaction_status IN (2, 2)"
        );
        assert_eq!(
            rendered(SearchTerm::new("transaction.status", SearchOperator::Neq, "")),
            "transaction_status IS NOT NULL"
        );
        assert!(matches!(
            lower(SearchTerm::new("transaction.status", SearchOperator::Eq, "bogus")),
            Err(FilterError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_issue_id() {
        assert_eq!(
            rendered(SearchTerm::new("issue.id", SearchOperator::Eq, 5i64)),
            "ifNull(group_id, 0) = 5"
        );
        // Rows without an issue must survive a negated lookup.
        assert_eq!(
            rendered(SearchTerm::new("issue.id", SearchOperator::Neq, "5")),
            "ifNull(group_id, 0) != 5"
        );
        assert_eq!(
            rendered(SearchTerm::new("issue.id", SearchOperator::NotIn, vec!["5", "6"])),
            "ifNull(group_id, 0) NOT IN (5, 6)"
        );
        assert_eq!(
            rendered(SearchTerm::new("issue.id", SearchOperator::In, vec!["", "5"])),
            "ifNull(group_id, 0) IN (0, 5)"
        );
        assert!(matches!(
            lower(SearchTerm::new("issue.id", SearchOperator::Eq, "abc")),
            Err(FilterError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_issue_short_ids() {
        let resolver = StaticResolver::new().with_issue("BACKEND-1A", 10);
        let render = |term| lower_with(&resolver, term).map(|(c, _)| c.map(|c| c.to_string()));

        assert_eq!(
            render(SearchTerm::new("issue", SearchOperator::Eq, "BACKEND-1A")).unwrap().as_deref(),
            Some("ifNull(group_id, 0) = 10")
        );
        assert_eq!(
            render(SearchTerm::new("issue", SearchOperator::Eq, "unknown")).unwrap().as_deref(),
            Some("ifNull(group_id, 0) = 0")
        );
        assert!(matches!(
            render(SearchTerm::new("issue", SearchOperator::Eq, "MISSING-1")),
            Err(FilterError::Unresolved(_))
        ));
        assert_eq!(
            render(SearchTerm::new("issue", SearchOperator::Neq, "MISSING-1")).unwrap(),
            None
        );
    }

    #[test]
    fn test_error_handled() {
        let handled = |operator, value: &str| rendered(SearchTerm::new("error.handled", operator, value));
        assert_eq!(handled(SearchOperator::Eq, "1"), "isHandled() = 1");
        assert_eq!(handled(SearchOperator::Eq, "0"), "notHandled() = 1");
        assert_eq!(handled(SearchOperator::Neq, "1"), "notHandled() = 1");
        // Events without mechanism data count as handled.
        assert_eq!(handled(SearchOperator::Eq, ""), "isHandled() = 1");
        assert_eq!(handled(SearchOperator::Neq, ""), "isHandled() = 0");

        let unhandled = |operator, value: &str| rendered(SearchTerm::new("error.unhandled", operator, value));
        assert_eq!(unhandled(SearchOperator::Eq, "1"), "notHandled() = 1");
        assert_eq!(unhandled(SearchOperator::Eq, "0"), "isHandled() = 1");
        assert_eq!(unhandled(SearchOperator::Neq, "1"), "isHandled() = 1");
        assert_eq!(unhandled(SearchOperator::Eq, ""), "notHandled() = 1");
        assert_eq!(unhandled(SearchOperator::Neq, ""), "notHandled() = 0");

        match lower(SearchTerm::new("error.handled", SearchOperator::Eq, "2")) {
            Err(FilterError::InvalidValue { reason, .. }) => assert_eq!(reason, "accepted values are 1, 0"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_user_display() {
        assert_eq!(
            rendered(SearchTerm::new("user.display", SearchOperator::Eq, "*@example.com").wildcard()),
            r"match(coalesce(email, username, ip_address), '(?i)^.*@example\.com$') = 1"
        );
        assert_eq!(
            rendered(SearchTerm::new("user.display", SearchOperator::Neq, "")),
            "isNull(coalesce(email, username, ip_address)) != 1"
        );
        assert_eq!(
            rendered(SearchTerm::new("user.display", SearchOperator::Eq, "jane")),
            "coalesce(email, username, ip_address) = 'jane'"
        );
    }

    #[test]
    fn test_key_transaction() {
        assert!(matches!(
            lower(SearchTerm::new("team_key_transaction", SearchOperator::Eq, "1")),
            Err(FilterError::UnsupportedField(_))
        ));

        let resolver = StaticResolver::new().with_field_alias(
            "team_key_transaction",
            Expression::function("isKeyTransaction", vec![Expression::column("transaction_name")]),
        );
        let render = |operator, value: &str| {
            lower_with(&resolver, SearchTerm::new("team_key_transaction", operator, value))
                .unwrap()
                .0
                .unwrap()
                .to_string()
        };
        assert_eq!(render(SearchOperator::Eq, "1"), "isKeyTransaction(transaction_name) = 1");
        assert_eq!(render(SearchOperator::Neq, "1"), "isKeyTransaction(transaction_name) = 0");
        assert_eq!(render(SearchOperator::Eq, "0"), "isKeyTransaction(transaction_name) = 0");
        assert_eq!(render(SearchOperator::Neq, ""), "isKeyTransaction(transaction_name) != 0");
    }

    #[test]
    fn test_project_slugs() {
        let resolver = StaticResolver::new().with_project("backend", 2).with_project("frontend", 3);

        let (condition, projects) = lower_with(
            &resolver,
            SearchTerm::new("project", SearchOperator::In, vec!["frontend", "backend"]),
        )
        .unwrap();
        assert_eq!(condition.unwrap().to_string(), "project_id IN (2, 3)");
        assert_eq!(projects, vec![2, 3]);

        let (condition, projects) = lower_with(
            &resolver,
            SearchTerm::new("project.name", SearchOperator::NotIn, vec!["backend", "missing"]),
        )
        .unwrap();
        assert_eq!(condition.unwrap().to_string(), "project_id NOT IN (2)");
        assert!(projects.is_empty());

        match lower_with(&resolver, SearchTerm::new("project", SearchOperator::Eq, "missing")) {
            Err(FilterError::Unresolved(message)) => assert_eq!(
                message,
                "Invalid query. Project(s) missing do not exist or are not actively selected."
            ),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_latest_release() {
        let resolver = StaticResolver::new().with_latest_release("2.0.0");
        let (condition, _) =
            lower_with(&resolver, SearchTerm::new("release", SearchOperator::Eq, "latest")).unwrap();
        assert_eq!(condition.unwrap().to_string(), "release = '2.0.0'");

        assert!(matches!(
            lower(SearchTerm::new("release", SearchOperator::Eq, "latest")),
            Err(FilterError::Unresolved(_))
        ));
        assert_eq!(lower(SearchTerm::new("release", SearchOperator::Neq, "latest")).unwrap(), None);
        assert_eq!(
            rendered(SearchTerm::new("release", SearchOperator::Neq, "1.0")),
            "(release IS NULL OR release != '1.0')"
        );
    }

    #[test]
    fn test_generic_columns_and_tags() {
        assert_eq!(
            rendered(SearchTerm::new("user.email", SearchOperator::Eq, "foo@example.com")),
            "email = 'foo@example.com'"
        );
        assert_eq!(
            rendered(SearchTerm::new("browser", SearchOperator::Neq, "chrome").tag()),
            "tags[browser] != 'chrome'"
        );
        assert_eq!(
            rendered(SearchTerm::new("browser", SearchOperator::Neq, "").tag()),
            "tags[browser] != ''"
        );
        assert_eq!(
            rendered(SearchTerm::new("group_id", SearchOperator::Eq, "5")),
            "tags[group_id] = '5'"
        );
        assert_eq!(rendered(SearchTerm::new("release", SearchOperator::Neq, "")), "isNull(release) != 1");
        assert_eq!(rendered(SearchTerm::new("event.type", SearchOperator::Eq, "")), "type = ''");
        assert_eq!(lower(SearchTerm::new("start", SearchOperator::Eq, "x")).unwrap(), None);
        assert!(matches!(
            lower(SearchTerm::new("browser", SearchOperator::Eq, "chrome")),
            Err(FilterError::UnsupportedField(_))
        ));
    }

    #[test]
    fn test_array_fields() {
        assert_eq!(
            rendered(SearchTerm::new("error.type", SearchOperator::In, vec!["A", "B"])),
            "hasAny(exception_stacks.type, ('A', 'B')) = 1"
        );
        assert_eq!(
            rendered(SearchTerm::new("error.value", SearchOperator::Eq, "Value*").wildcard()),
            "exception_stacks.value LIKE 'Value%'"
        );
        assert_eq!(
            rendered(SearchTerm::new("stack.filename", SearchOperator::Neq, "")),
            "notEmpty(exception_frames.filename) = 1"
        );
    }

    #[test]
    fn test_wildcards() {
        assert_eq!(
            rendered(SearchTerm::new("user.email", SearchOperator::Neq, "*@example.com").wildcard()),
            r"(email IS NULL OR match(email, '(?i)^.*@example\.com$') != 1)"
        );
        assert!(matches!(
            lower(SearchTerm::new("user.email", SearchOperator::Gt, "a*").wildcard()),
            Err(FilterError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_event_ids() {
        assert_eq!(
            rendered(SearchTerm::new("id", SearchOperator::Eq, "5D1B0FE0-3A5E-4A3B-9F5C-0E8D5F0B6C7A")),
            "event_id = '5d1b0fe03a5e4a3b9f5c0e8d5f0b6c7a'"
        );
        assert_eq!(
            rendered(SearchTerm::new("trace", SearchOperator::Eq, "5d1b0fe03a5e4a3b9f5c0e8d5f0b6c7a")),
            "contexts[trace.trace_id] = '5d1b0fe03a5e4a3b9f5c0e8d5f0b6c7a'"
        );
        assert!(matches!(
            lower(SearchTerm::new("id", SearchOperator::Eq, "not-a-uuid")),
            Err(FilterError::InvalidValue { .. })
        ));
        assert!(matches!(
            lower(SearchTerm::new("id", SearchOperator::Eq, "5d1b*").wildcard()),
            Err(FilterError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_datetimes() {
        let dt = Utc.with_ymd_and_hms(2015, 5, 18, 10, 15, 1).unwrap();
        assert_eq!(datetimes_to_millis(Value::from(dt)), Value::Int(1_431_944_101_000));
        assert_eq!(
            rendered(SearchTerm::new("timestamp", SearchOperator::Gte, dt)),
            "timestamp >= '2015-05-18T10:15:01Z'"
        );

        let term = SearchTerm::new("timestamp", SearchOperator::Lt, "2015-05-18T12:15:01+02:00");
        assert_eq!(
            lower(term).unwrap(),
            Some(Condition::compare(Expression::column("timestamp"), Op::Lt, Value::DateTime(dt)))
        );
        assert!(matches!(
            lower(SearchTerm::new("timestamp", SearchOperator::Gte, "yesterday")),
            Err(FilterError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_timestamp_like_strings_stay_strings() {
        let term: SearchTerm =
            serde_json::from_str(r#"{"key": "release", "operator": "=", "value": "2015-05-18T10:15:01Z"}"#)
                .unwrap();
        assert_eq!(rendered(term), "release = '2015-05-18T10:15:01Z'");
    }

    #[test]
    fn test_ids_out_of_range() {
        let resolver = StaticResolver::new().with_project("huge", u64::MAX);
        match lower_with(&resolver, SearchTerm::new("project", SearchOperator::Eq, "huge")) {
            Err(FilterError::InvalidValue { field, .. }) => assert_eq!(field, "project.id"),
            other => panic!("unexpected result: {:?}", other),
        }

        let resolver = StaticResolver::new().with_issue("HUGE-1", i64::MAX as u64 + 1);
        assert!(matches!(
            lower_with(&resolver, SearchTerm::new("issue", SearchOperator::In, vec!["HUGE-1"])),
            Err(FilterError::InvalidValue { .. })
        ));
        assert_eq!(
            id_values("project.id", &[1, i64::MAX as u64]).unwrap(),
            vec![Value::Int(1), Value::Int(i64::MAX)]
        );
    }
}
