// volboot/src/cli/link.rs
use clap::Args;
use volboot_common::config::Config;
use volboot_common::error::Result;
use volboot_common::pipeline::BootStage;

use super::provision::run_stages;

#[derive(Args, Debug)]
pub struct Link;

impl Link {
    pub async fn run(&self, config: &Config) -> Result<()> {
        run_stages(config, &[BootStage::LinkingAssets], false).await
    }
}
