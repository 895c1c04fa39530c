//! Model catalog: remote listings merged with local storage

pub mod remote;
pub mod repository;
pub mod search;

pub use remote::{HttpCatalog, RemoteCatalog, StaticCatalog, parse_listing};
pub use repository::CatalogRepository;
pub use search::{filter_models, sort_models};
