// volboot/src/cli/image_spec.rs
use clap::Args;
use volboot_common::config::Config;
use volboot_common::error::Result;

/// Prints `[image]` for the image builder: packages in install order, then
/// the build commands in declaration order.
#[derive(Args, Debug)]
pub struct ImageSpecCmd {
    /// Single-line JSON
    #[arg(long)]
    pub compact: bool,
}

impl ImageSpecCmd {
    pub async fn run(&self, config: &Config) -> Result<()> {
        let rendered = if self.compact {
            serde_json::to_string(&config.image)?
        } else {
            serde_json::to_string_pretty(&config.image)?
        };
        println!("{rendered}");
        Ok(())
    }
}
