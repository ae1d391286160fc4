// volboot/src/cli.rs
//! Defines the command-line argument structure using clap.
use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};
use volboot_common::config::Config;
use volboot_common::error::Result;

pub mod boot;
pub mod frontend;
pub mod image_spec;
pub mod link;
pub mod models;
pub mod plugins;
pub mod provision;
pub mod status;

use crate::cli::boot::Boot;
use crate::cli::frontend::Frontend;
use crate::cli::image_spec::ImageSpecCmd;
use crate::cli::link::Link;
use crate::cli::models::Models;
use crate::cli::plugins::Plugins;
use crate::cli::provision::Provision;
use crate::cli::status::Status;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, name = "volboot", bin_name = "volboot")]
#[command(propagate_version = true)]
pub struct CliArgs {
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Provisioning manifest (defaults to $VOLBOOT_CONFIG, then ./volboot.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Provision the volume, launch the server and keep it running
    Boot(Boot),
    /// Seed, update, install, fetch and link without launching
    Provision(Provision),
    /// Install declared plugins
    Plugins(Plugins),
    /// Fetch declared models and raw downloads
    Models(Models),
    /// Populate tool caches and expose them at their aliases
    Link(Link),
    /// Show what is on the volume compared with the manifest
    Status(Status),
    /// Print the declarative image build list as JSON
    ImageSpec(ImageSpecCmd),
    /// Serve the prompt form in front of a running server
    Frontend(Frontend),
}

impl Command {
    pub async fn run(&self, config: &Config) -> Result<()> {
        match self {
            Self::Boot(command) => command.run(config).await,
            Self::Provision(command) => command.run(config).await,
            Self::Plugins(command) => command.run(config).await,
            Self::Models(command) => command.run(config).await,
            Self::Link(command) => command.run(config).await,
            Self::Status(command) => command.run(config).await,
            Self::ImageSpec(command) => command.run(config).await,
            Self::Frontend(command) => command.run(config).await,
        }
    }

    /// Whether the command touches the volume (and so may log to it).
    pub fn works_on_volume(&self) -> bool {
        !matches!(
            self,
            Self::Status(_) | Self::ImageSpec(_) | Self::Frontend(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_global_flags_after_subcommand() {
        let args = CliArgs::parse_from(["volboot", "plugins", "--force", "-vv", "--config", "x.toml"]);
        assert_eq!(args.verbose, 2);
        assert_eq!(args.config, Some(PathBuf::from("x.toml")));
        match args.command {
            Command::Plugins(plugins) => assert!(plugins.force),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn image_spec_does_not_touch_the_volume() {
        let args = CliArgs::parse_from(["volboot", "image-spec"]);
        assert!(!args.command.works_on_volume());
        let args = CliArgs::parse_from(["volboot", "boot"]);
        assert!(args.command.works_on_volume());
    }

    #[test]
    fn bundled_manifest_parses() {
        let raw = include_str!("../../demos/volboot.toml");
        let config = Config::from_toml(raw).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.ordered_plugins()[0].repo, "ltdrdata/ComfyUI-Manager");
        assert_eq!(config.image.packages.len(), 4);
        assert!(config.frontend.enabled);
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        CliArgs::command().debug_assert();
    }
}
