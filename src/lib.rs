// Core modules
pub mod api;
pub mod config;
pub mod execution;
pub mod indicators;
pub mod models;
pub mod shutdown;
pub mod strategy;

// Re-export commonly used types
pub use config::AppConfig;
pub use models::*;
pub use shutdown::{Shutdown, ShutdownTrigger};
pub use strategy::Strategy;
