//! Request-scoped parameters every compiled filter is bounded by.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FilterError;

/// Time window and scope of a single compile-and-query cycle. These values
/// are trusted: access checks happened before they were built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterParams {
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
    pub project_ids: Vec<u64>,
    pub organization_id: u64,
    #[serde(default)]
    pub environments: Option<Vec<String>>,
}

impl FilterParams {
    pub fn new(organization_id: u64, project_ids: Vec<u64>) -> Self {
        Self {
            start: None,
            end: None,
            project_ids,
            organization_id,
            environments: None,
        }
    }

    pub fn with_range(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.start = Some(start);
        self.end = Some(end);
        self
    }

    pub fn with_environments<I, S>(mut self, environments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.environments = Some(environments.into_iter().map(Into::into).collect());
        self
    }

    pub fn validate(&self) -> Result<(), FilterError> {
        if self.project_ids.is_empty() {
            return Err(FilterError::InvalidParams(
                "project ids are required to build a filter".to_string(),
            ));
        }
        if let (Some(start), Some(end)) = (self.start, self.end) {
            if start >= end {
                return Err(FilterError::InvalidParams(format!(
                    "start ({}) must be before end ({})",
                    start, end
                )));
            }
        }
        Ok(())
    }
}
