//! Filtering and ordering of model listings

use crate::compatibility::CompatibilityChecker;
use crate::models::{
    Category, CompatibilityTier, ModelRecord, SearchFilters, SortDirection, SortKey,
    parse_parameter_count,
};
use std::cmp::Ordering;

/// Apply a free-text query and structured filters, then sort
///
/// The query and `filters.query` must both match when both are set.
pub fn filter_models(
    models: Vec<ModelRecord>,
    query: &str,
    filters: &SearchFilters,
    checker: &CompatibilityChecker,
) -> Vec<ModelRecord> {
    let needles: Vec<String> = [Some(query), filters.query.as_deref()]
        .into_iter()
        .flatten()
        .map(|q| q.trim().to_lowercase())
        .filter(|q| !q.is_empty())
        .collect();
    let author = filters.author.as_deref().map(str::trim).filter(|a| !a.is_empty());

    let mut matched: Vec<ModelRecord> = models
        .into_iter()
        .filter(|m| needles.iter().all(|needle| m.matches_query(needle)))
        .filter(|m| within_parameter_bounds(m, filters))
        .filter(|m| filters.min_size.is_none_or(|min| m.size >= min))
        .filter(|m| filters.max_size.is_none_or(|max| m.size <= max))
        .filter(|m| author.is_none_or(|a| m.author.eq_ignore_ascii_case(a)))
        .filter(|m| filters.tags.iter().all(|tag| m.has_tag(tag)))
        .filter(|m| {
            !filters.compatible_only
                || checker.resolve_tier(m) == CompatibilityTier::FullyCompatible
        })
        .filter(|m| in_category(m, filters.category, checker))
        .collect();

    sort_models(&mut matched, filters.sort_by, filters.sort_direction);
    matched
}

fn within_parameter_bounds(record: &ModelRecord, filters: &SearchFilters) -> bool {
    if filters.min_parameters.is_none() && filters.max_parameters.is_none() {
        return true;
    }

    let billions = parse_parameter_count(&record.parameters);
    filters.min_parameters.is_none_or(|min| billions >= min)
        && filters.max_parameters.is_none_or(|max| billions <= max)
}

fn in_category(record: &ModelRecord, category: Category, checker: &CompatibilityChecker) -> bool {
    match category {
        Category::All => true,
        Category::Local => record.is_local,
        Category::Remote => !record.is_local,
        Category::Compatible => {
            checker.resolve_tier(record) >= CompatibilityTier::PartiallyCompatible
        }
        Category::Featured => record.is_featured(),
    }
}

/// Sort in place; ties are broken by case-insensitive name, then id
pub fn sort_models(models: &mut [ModelRecord], key: SortKey, direction: SortDirection) {
    models.sort_by(|a, b| {
        let primary = match key {
            SortKey::Name => Ordering::Equal,
            SortKey::Size => a.size.cmp(&b.size),
        };
        let ordering = primary
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
            .then_with(|| a.id.cmp(&b.id));

        match direction {
            SortDirection::Ascending => ordering,
            SortDirection::Descending => ordering.reverse(),
        }
    });
}
