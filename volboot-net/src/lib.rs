// volboot-net/src/lib.rs
pub mod http;
pub mod registry;
pub mod validation;

pub use http::Fetcher;
pub use registry::{git_archive_url, git_clone_url, model_file_url};
pub use validation::{validate_url, verify_checksum, verify_content_type};
pub use volboot_common::{BootError, Config, Result};
