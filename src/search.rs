//! Structured search terms as handed over by the search-string tokenizer.

use serde::{Deserialize, Serialize};

use crate::ast::{Op, Value};

/// Operators a search term can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SearchOperator {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Neq,
    #[serde(rename = "IN")]
    In,
    #[serde(rename = "NOT IN")]
    NotIn,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Lte,
}

impl SearchOperator {
    pub fn as_op(&self) -> Op {
        match self {
            SearchOperator::Eq => Op::Eq,
            SearchOperator::Neq => Op::Neq,
            SearchOperator::In => Op::In,
            SearchOperator::NotIn => Op::NotIn,
            SearchOperator::Gt => Op::Gt,
            SearchOperator::Gte => Op::Gte,
            SearchOperator::Lt => Op::Lt,
            SearchOperator::Lte => Op::Lte,
        }
    }

    /// `=` and `IN`: the term asks for matching values.
    pub fn is_equality(&self) -> bool {
        matches!(self, SearchOperator::Eq | SearchOperator::In)
    }

    /// `!=` and `NOT IN`.
    pub fn is_negation(&self) -> bool {
        matches!(self, SearchOperator::Neq | SearchOperator::NotIn)
    }

    pub fn is_in(&self) -> bool {
        matches!(self, SearchOperator::In | SearchOperator::NotIn)
    }
}

/// One `key:value` filter of a search query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchTerm {
    pub key: String,
    pub operator: SearchOperator,
    pub value: Value,
    #[serde(default)]
    pub is_tag: bool,
    #[serde(default)]
    pub is_wildcard: bool,
}

impl SearchTerm {
    pub fn new(key: impl Into<String>, operator: SearchOperator, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            operator,
            value: value.into(),
            is_tag: false,
            is_wildcard: false,
        }
    }

    pub fn tag(mut self) -> Self {
        self.is_tag = true;
        self
    }

    pub fn wildcard(mut self) -> Self {
        self.is_wildcard = true;
        self
    }

    pub fn is_in_filter(&self) -> bool {
        self.operator.is_in()
    }

    /// `has:key` arrives as `key != ""` and `!has:key` as `key = ""`.
    pub fn is_has_query(&self) -> bool {
        self.value.is_empty_string()
    }

    /// A copy of this term pointing at `key` with a new value. The operator
    /// is kept; wildcard matching is not.
    pub(crate) fn rewrite(&self, key: &str, value: Value) -> SearchTerm {
        SearchTerm {
            key: key.to_string(),
            operator: self.operator,
            value,
            is_tag: false,
            is_wildcard: false,
        }
    }
}

/// A search query with its boolean structure kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryItem {
    Term(SearchTerm),
    And,
    Or,
    Group(Vec<QueryItem>),
}

impl QueryItem {
    pub fn is_operator(&self) -> bool {
        matches!(self, QueryItem::And | QueryItem::Or)
    }
}

impl From<SearchTerm> for QueryItem {
    fn from(term: SearchTerm) -> Self {
        QueryItem::Term(term)
    }
}

/// Translates a `*` glob into a regex. A backslash escapes the next
/// character; everything else is matched literally.
pub fn wildcard_to_regex(pattern: &str, anchored: bool) -> String {
    let mut regex = String::with_capacity(pattern.len() + 2);
    if anchored {
        regex.push('^');
    }

    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(escaped) => regex.push_str(&regex::escape(&escaped.to_string())),
                None => regex.push_str(&regex::escape("\\")),
            },
            '*' => regex.push_str(".*"),
            c => regex.push_str(&regex::escape(&c.to_string())),
        }
    }

    if anchored {
        regex.push('$');
    }
    regex
}

/// Translates a `*` glob into a SQL `LIKE` pattern.
pub fn wildcard_to_like(pattern: &str) -> String {
    pattern
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
        .replace('*', "%")
}
