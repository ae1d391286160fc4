// volboot/src/cli/frontend.rs
use clap::Args;
use volboot_common::config::Config;
use volboot_common::error::Result;

use super::boot::shutdown_signal;
use crate::frontend;

#[derive(Args, Debug)]
pub struct Frontend {
    /// Port to listen on (overrides [frontend].port)
    #[arg(long)]
    pub port: Option<u16>,
}

impl Frontend {
    pub async fn run(&self, config: &Config) -> Result<()> {
        let mut config = config.clone();
        if let Some(port) = self.port {
            config.frontend.port = port;
        }
        frontend::serve(&config, shutdown_signal()).await
    }
}
