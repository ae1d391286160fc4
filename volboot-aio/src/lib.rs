// volboot-aio/src/lib.rs
//! Blocking and async IO primitives for volboot (filesystem, archives,
//! subprocesses, git).

pub mod extract;
pub mod fs;
pub mod git2;
pub mod process;

pub use extract::{extract_archive, place_archive, place_archive_async, ArchiveKind};
pub use fs::*;
pub use git2::{clone_recursive_async, update_repo_async, UpdateOutcome};
pub use process::{run_checked, run_command_async};
