//! Search filters for the catalog

use crate::error::{DepotError, DepotResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Partition of the catalog to search in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    #[default]
    All,
    Local,
    Remote,
    Compatible,
    Featured,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    #[default]
    Name,
    Size,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

/// Structured constraints applied after the free-text match
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchFilters {
    /// Additional free-text query, combined with the explicit search query
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    /// Lower bound on parameters, in billions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_parameters: Option<f64>,
    /// Upper bound on parameters, in billions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_parameters: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_size: Option<u64>,
    /// Case-insensitive author match
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Every tag listed here must be present on the record
    pub tags: BTreeSet<String>,
    /// Keep only fully compatible models
    pub compatible_only: bool,
    pub category: Category,
    pub sort_by: SortKey,
    pub sort_direction: SortDirection,
}

impl SearchFilters {
    /// Reject filters whose bounds can never match
    pub fn validate(&self) -> DepotResult<()> {
        for bound in [self.min_parameters, self.max_parameters].into_iter().flatten() {
            if !bound.is_finite() || bound < 0.0 {
                return Err(DepotError::validation(format!(
                    "Parameter bound must be a non-negative number (got {})",
                    bound
                )));
            }
        }

        if let (Some(min), Some(max)) = (self.min_parameters, self.max_parameters)
            && min > max
        {
            return Err(DepotError::validation(format!(
                "min_parameters ({}) is greater than max_parameters ({})",
                min, max
            )));
        }

        if let (Some(min), Some(max)) = (self.min_size, self.max_size)
            && min > max
        {
            return Err(DepotError::validation(format!(
                "min_size ({}) is greater than max_size ({})",
                min, max
            )));
        }

        Ok(())
    }
}
