// volboot-common/src/lib.rs
pub mod config;
pub mod error;
pub mod lock;
pub mod manifest;
pub mod model;
pub mod pipeline;

// Re-export key types
pub use config::Config;
pub use error::{BootError, Result};
pub use model::{ModelSpec, PluginSpec, RawDownload, ToolCache, UpdatePolicy};
