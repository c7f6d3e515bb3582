// Public modules
pub mod cache;
pub mod context;
pub mod error;
pub mod executor;
pub mod expr;
pub mod git;
pub mod interpolate;
pub mod matrix;
pub mod migration;
pub mod output;
pub mod scheduler;
pub mod service;
pub mod trigger;
pub mod workflow;

// Re-export common types for convenience
pub use error::{Error, ErrorCode, Hint, Result};
