//! Axum HTTP API.
//!
//! This crate provides:
//! - Image upload, which stores the original and publishes a processing task
//! - Retrieval, listing and deletion of stored quality variants
//! - Health and readiness probes
//! - Prometheus metrics

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
