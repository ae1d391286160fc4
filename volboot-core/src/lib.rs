// volboot-core/src/lib.rs

pub mod check;
pub mod inference;
pub mod install;
pub mod launch;
pub mod link;
pub mod pipeline;
pub mod seed;
pub mod update;

pub use check::{StatusReport, VolumeStatus};
pub use inference::{InferenceClient, JobParams, OutputImage};
pub use install::{ensure_download, ensure_model, ensure_plugin, ensure_tool_cache};
pub use launch::{wait_healthy, Supervisor};
pub use link::{link_or_copy, link_or_copy_with, LinkMode};
pub use pipeline::{Bootstrap, PROVISION_STAGES};
pub use seed::seed_app_tree;
pub use update::update_components;
