//! Property-based tests using proptest
//!
//! Invariants of the pure parts of the depot: parameter parsing, the
//! size table, search and configuration serialization.

use model_depot::catalog::{filter_models, sort_models};
use model_depot::config::DepotConfig;
use model_depot::models::{
    Category, ParameterSizeTable, SearchFilters, SortDirection, SortKey, parse_parameter_count,
};
use model_depot::{CompatibilityChecker, CompatibilityTier, ModelRecord};
use proptest::prelude::*;
use std::collections::HashSet;
use std::path::PathBuf;

// =============================================================================
// Arbitrary Implementations
// =============================================================================

fn arb_tier() -> impl Strategy<Value = CompatibilityTier> {
    prop_oneof![
        Just(CompatibilityTier::Incompatible),
        Just(CompatibilityTier::Unknown),
        Just(CompatibilityTier::PartiallyCompatible),
        Just(CompatibilityTier::FullyCompatible),
    ]
}

/// Generate arbitrary catalog entries, some of them local
fn arb_model() -> impl Strategy<Value = ModelRecord> {
    (
        "[a-z]{2,8}/[a-z0-9-]{2,12}",       // id like "acme/model-7b"
        "[A-Za-z][A-Za-z0-9 ]{0,20}",       // display name
        0u64..50_000_000_000,               // size
        prop::option::of(1u32..200),        // parameter count in billions
        arb_tier(),
        prop::collection::btree_set("[a-z]{3,6}", 0..3),
        any::<bool>(),                      // is_local
    )
        .prop_map(|(id, name, size, params, tier, tags, is_local)| {
            let mut record = ModelRecord::new(id.clone(), name, size)
                .with_compatibility(tier)
                .with_tags(tags);
            if let Some(params) = params {
                record = record.with_parameters(format!("{}B", params));
            }
            if is_local {
                record.mark_local(PathBuf::from(format!("/store/{}/model.gguf", id)));
            }
            record
        })
}

fn arb_listing() -> impl Strategy<Value = Vec<ModelRecord>> {
    prop::collection::vec(arb_model(), 0..30).prop_map(|models| {
        // Ids are unique within a listing
        let mut seen = HashSet::new();
        models
            .into_iter()
            .filter(|m| seen.insert(m.id.clone()))
            .collect()
    })
}

fn arb_filters() -> impl Strategy<Value = SearchFilters> {
    (
        prop::option::of(0u64..25_000_000_000),
        prop::option::of(0.0f64..100.0),
        any::<bool>(),
        prop_oneof![
            Just(Category::All),
            Just(Category::Local),
            Just(Category::Remote),
            Just(Category::Compatible),
            Just(Category::Featured),
        ],
        prop_oneof![Just(SortKey::Name), Just(SortKey::Size)],
        prop_oneof![Just(SortDirection::Ascending), Just(SortDirection::Descending)],
    )
        .prop_map(
            |(max_size, min_parameters, compatible_only, category, sort_by, sort_direction)| {
                SearchFilters {
                    max_size,
                    min_parameters,
                    compatible_only,
                    category,
                    sort_by,
                    sort_direction,
                    ..Default::default()
                }
            },
        )
}

// =============================================================================
// Parameter Count Parsing
// =============================================================================

proptest! {
    /// Any input parses to a finite, non-negative count without panicking
    #[test]
    fn parse_parameter_count_total(text in ".{0,16}") {
        let value = parse_parameter_count(&text);
        prop_assert!(value.is_finite());
        prop_assert!(value >= 0.0);
    }

    /// Suffixes scale by powers of a thousand, case-insensitively
    #[test]
    fn parse_parameter_count_suffixes(n in 0u32..100_000) {
        let n = f64::from(n);
        prop_assert_eq!(parse_parameter_count(&format!("{}B", n)), n);
        prop_assert_eq!(parse_parameter_count(&format!("{}b", n)), n);
        let mega = format!("{}M", n);
        let kilo = format!("{}k", n);
        prop_assert!((parse_parameter_count(&mega) - n / 1_000.0).abs() < 1e-9);
        prop_assert!((parse_parameter_count(&kilo) - n / 1_000_000.0).abs() < 1e-12);
    }

    /// Negative counts are never accepted
    #[test]
    fn parse_parameter_count_rejects_negative(n in 1u32..1000) {
        prop_assert_eq!(parse_parameter_count(&format!("-{}B", n)), 0.0);
    }
}

// =============================================================================
// Size Table Invariants
// =============================================================================

proptest! {
    /// A larger payload never maps to an earlier breakpoint
    #[test]
    fn label_for_size_is_monotonic(a in any::<u64>(), b in any::<u64>()) {
        let table = ParameterSizeTable::default();
        let (small, large) = if a <= b { (a, b) } else { (b, a) };

        let position = |label: &str| {
            table
                .breakpoints
                .iter()
                .position(|bp| bp.label == label)
                .unwrap_or(table.breakpoints.len())
        };

        prop_assert!(position(table.label_for_size(small)) <= position(table.label_for_size(large)));
    }
}

// =============================================================================
// Search Invariants
// =============================================================================

proptest! {
    /// Search returns a subset of its input that satisfies every filter
    #[test]
    fn search_returns_matching_subset(models in arb_listing(), filters in arb_filters()) {
        let checker = CompatibilityChecker::default();
        let ids: HashSet<String> = models.iter().map(|m| m.id.clone()).collect();

        let results = filter_models(models.clone(), "", &filters, &checker);

        prop_assert!(results.len() <= models.len());
        for model in &results {
            prop_assert!(ids.contains(&model.id));
            if let Some(max) = filters.max_size {
                prop_assert!(model.size <= max);
            }
            if let Some(min) = filters.min_parameters {
                prop_assert!(parse_parameter_count(&model.parameters) >= min);
            }
            if filters.compatible_only {
                prop_assert_eq!(checker.resolve_tier(model), CompatibilityTier::FullyCompatible);
            }
            match filters.category {
                Category::Local => prop_assert!(model.is_local),
                Category::Remote => prop_assert!(!model.is_local),
                Category::Featured => prop_assert!(model.is_featured()),
                Category::Compatible => prop_assert!(
                    checker.resolve_tier(model) >= CompatibilityTier::PartiallyCompatible
                ),
                Category::All => {}
            }
        }
    }

    /// Results come back in the requested order
    #[test]
    fn search_respects_sort_order(models in arb_listing(), filters in arb_filters()) {
        let checker = CompatibilityChecker::default();
        let results = filter_models(models, "", &filters, &checker);

        for pair in results.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            match (filters.sort_by, filters.sort_direction) {
                (SortKey::Size, SortDirection::Ascending) => prop_assert!(a.size <= b.size),
                (SortKey::Size, SortDirection::Descending) => prop_assert!(a.size >= b.size),
                (SortKey::Name, SortDirection::Ascending) => {
                    prop_assert!(a.name.to_lowercase() <= b.name.to_lowercase())
                }
                (SortKey::Name, SortDirection::Descending) => {
                    prop_assert!(a.name.to_lowercase() >= b.name.to_lowercase())
                }
            }
        }
    }

    /// Sorting twice gives the same order as sorting once
    #[test]
    fn sort_is_idempotent(mut models in arb_listing()) {
        sort_models(&mut models, SortKey::Size, SortDirection::Descending);
        let once: Vec<String> = models.iter().map(|m| m.id.clone()).collect();
        sort_models(&mut models, SortKey::Size, SortDirection::Descending);
        let twice: Vec<String> = models.iter().map(|m| m.id.clone()).collect();
        prop_assert_eq!(once, twice);
    }

    /// Every text query result mentions the query somewhere
    #[test]
    fn search_query_matches_text(models in arb_listing(), query in "[a-z]{1,3}") {
        let checker = CompatibilityChecker::default();
        let results = filter_models(models, &query, &SearchFilters::default(), &checker);

        for model in &results {
            let haystack = format!(
                "{} {} {}",
                model.name.to_lowercase(),
                model.author.to_lowercase(),
                model.tags.iter().cloned().collect::<Vec<_>>().join(" ")
            );
            prop_assert!(haystack.contains(&query));
        }
    }
}

// =============================================================================
// Compatibility Invariants
// =============================================================================

proptest! {
    /// Requirements always leave room above the payload size
    #[test]
    fn requirements_bound_the_payload(model in arb_model()) {
        let requirements = CompatibilityChecker::default().requirements(&model);
        prop_assert!(requirements.min_memory >= model.size.saturating_mul(2));
        prop_assert!(requirements.recommended_memory > requirements.min_memory);
        prop_assert!(requirements.min_storage >= model.size);
    }

    /// The resolved tier is never better than the declared one, except Unknown
    #[test]
    fn resolved_tier_never_upgrades(model in arb_model()) {
        let resolved = CompatibilityChecker::default().resolve_tier(&model);
        match model.compatibility {
            CompatibilityTier::Unknown => {
                prop_assert!(resolved <= CompatibilityTier::PartiallyCompatible)
            }
            declared => prop_assert!(resolved <= declared),
        }
    }
}

// =============================================================================
// Config Serialization Round-Trip Tests
// =============================================================================

fn arb_config() -> impl Strategy<Value = DepotConfig> {
    (
        1024u16..60000,           // api_port
        1usize..16,               // max_concurrent_downloads
        1u64..1_000_000,          // min_model_size_bytes
        1u32..=100,               // speed_smoothing in percent
        0u64..5000,               // progress_interval_ms
        any::<bool>(),            // check_disk_space
        1u64..256,                // host memory in GiB
        1u32..=100,               // memory_headroom in percent
    )
        .prop_map(
            |(
                api_port,
                max_concurrent_downloads,
                min_model_size_bytes,
                smoothing,
                progress_interval_ms,
                check_disk_space,
                memory_gib,
                headroom,
            )| DepotConfig {
                api_port,
                max_concurrent_downloads,
                min_model_size_bytes,
                speed_smoothing: f64::from(smoothing) / 100.0,
                progress_interval_ms,
                check_disk_space,
                host_memory_bytes: memory_gib * 1024 * 1024 * 1024,
                memory_headroom: f64::from(headroom) / 100.0,
                storage_root: PathBuf::from("/var/lib/model-depot"),
                ..Default::default()
            },
        )
}

proptest! {
    /// DepotConfig serializes to TOML and deserializes back
    #[test]
    fn depot_config_roundtrip(config in arb_config()) {
        let toml_str = toml::to_string(&config).expect("Failed to serialize to TOML");
        let parsed: DepotConfig = toml::from_str(&toml_str).expect("Failed to parse TOML");

        prop_assert_eq!(config.api_port, parsed.api_port);
        prop_assert_eq!(config.max_concurrent_downloads, parsed.max_concurrent_downloads);
        prop_assert_eq!(config.min_model_size_bytes, parsed.min_model_size_bytes);
        prop_assert_eq!(config.speed_smoothing, parsed.speed_smoothing);
        prop_assert_eq!(config.progress_interval_ms, parsed.progress_interval_ms);
        prop_assert_eq!(config.check_disk_space, parsed.check_disk_space);
        prop_assert_eq!(config.host_memory_bytes, parsed.host_memory_bytes);
        prop_assert_eq!(config.memory_headroom, parsed.memory_headroom);
        prop_assert_eq!(config.storage_root, parsed.storage_root);
        prop_assert_eq!(config.parameter_table, parsed.parameter_table);
    }

    /// ModelRecord survives the JSON sidecar format
    #[test]
    fn model_record_json_roundtrip(model in arb_model()) {
        let json = serde_json::to_string(&model).expect("Failed to serialize to JSON");
        let parsed: ModelRecord = serde_json::from_str(&json).expect("Failed to parse JSON");
        prop_assert_eq!(model, parsed);
    }
}
