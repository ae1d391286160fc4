// volboot/src/cli/plugins.rs
use clap::Args;
use volboot_common::config::Config;
use volboot_common::error::Result;
use volboot_common::pipeline::BootStage;

use super::provision::run_stages;

#[derive(Args, Debug)]
pub struct Plugins {
    /// Remove and re-fetch plugins that are already installed
    #[arg(long)]
    pub force: bool,
}

impl Plugins {
    pub async fn run(&self, config: &Config) -> Result<()> {
        // Plugins live inside the application tree, which must exist first.
        run_stages(
            config,
            &[BootStage::Seeding, BootStage::InstallingPlugins],
            self.force,
        )
        .await
    }
}
