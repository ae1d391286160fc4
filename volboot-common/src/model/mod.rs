// volboot-common/src/model/mod.rs
// Declarations of what the provisioning pipeline should place on the volume.

pub mod asset;
pub mod plugin;

// Re-export
pub use asset::{ModelSpec, RawDownload, ToolCache};
pub use plugin::{PluginSpec, UpdatePolicy};
