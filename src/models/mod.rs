//! Model data types
//!
//! Provides:
//! - The canonical `ModelRecord` shared by storage, catalog and downloads
//! - Search filters for the catalog
//! - Parameter-count parsing and size-based parameter estimation

pub mod filters;
pub mod params;
pub mod record;

pub use filters::{Category, SearchFilters, SortDirection, SortKey};
pub use params::{ParameterBreakpoint, ParameterSizeTable, parse_parameter_count};
pub use record::{CompatibilityTier, FEATURED_TAG, ModelFormat, ModelRecord};
