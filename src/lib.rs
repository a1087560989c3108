// ModSync - dry-run engine for KOTOR mod install instructions
//
// This is the library crate containing the component model, the install simulator and the
// validation cache. The binary crate (main.rs) provides a command-line report.

pub mod cache;
pub mod config;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod services;
pub mod state;

// Re-export commonly used types for convenience
pub use cache::{CacheEvent, CacheKey, ValidationCache};
pub use config::ConfigManager;
pub use metrics::Metrics;
pub use models::{Component, Instruction, InstructionFile, UserConfig, WorkingSet};
pub use state::{StateChange, StateManager};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
