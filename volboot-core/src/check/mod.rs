pub mod status;

pub use status::{AssetState, LinkState, StatusReport, VolumeStatus};
