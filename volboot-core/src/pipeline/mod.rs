// volboot-core/src/pipeline/mod.rs
// The boot sequence: seed, update, install, fetch, link, launch.

mod lock;
mod sequencer;

pub use sequencer::{Bootstrap, PROVISION_STAGES};
