//! REST API over the catalog, downloads and local storage

pub mod handlers;
pub mod models;
pub mod routes;

pub use routes::{AppState, create_router};
