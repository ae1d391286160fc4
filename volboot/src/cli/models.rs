// volboot/src/cli/models.rs
use clap::Args;
use volboot_common::config::Config;
use volboot_common::error::Result;
use volboot_common::pipeline::BootStage;

use super::provision::run_stages;

#[derive(Args, Debug)]
pub struct Models;

impl Models {
    pub async fn run(&self, config: &Config) -> Result<()> {
        run_stages(
            config,
            &[BootStage::Seeding, BootStage::FetchingModels],
            false,
        )
        .await
    }
}
