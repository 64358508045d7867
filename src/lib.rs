// Core modules
pub mod config;
pub mod db;
pub mod error;
pub mod exchange;
pub mod execution;
pub mod helpers;
pub mod indicators;
pub mod logging;
pub mod models;
pub mod strategy;

// Re-export commonly used types
pub use error::Error;
pub use models::*;
pub use strategy::Strategy;

// Error handling
pub type Result<T> = std::result::Result<T, Error>;
