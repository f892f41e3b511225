// Content service - cross-store sagas over a graph store, a search index,
// a cache and a blob store

// Core types and primitives
pub mod core;

// Store contracts and bundled backends
pub mod infrastructure;

// Create, update and delete sagas with compensation
pub mod orchestration;

// Read path, relationships and auditing
pub mod services;

// Common utilities
pub mod app_state;
pub mod config;
pub mod error;

// Re-exports for convenience
pub use app_state::AppState;
pub use config::Config;
pub use error::{AppError, AppResult};
