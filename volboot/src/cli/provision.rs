// volboot/src/cli/provision.rs
use clap::Args;
use colored::Colorize;
use volboot_common::config::Config;
use volboot_common::error::Result;
use volboot_common::model::UpdatePolicy;
use volboot_common::pipeline::{BootStage, ItemOutcome, ProvisionReport};
use volboot_core::{Bootstrap, PROVISION_STAGES};

#[derive(Args, Debug)]
pub struct Provision {
    /// Replace every plugin even when it is already installed
    #[arg(long)]
    pub force: bool,
}

impl Provision {
    pub async fn run(&self, config: &Config) -> Result<()> {
        run_stages(config, &PROVISION_STAGES, self.force).await
    }
}

/// Runs `stages` under the volume lock and prints what happened.
pub(crate) async fn run_stages(config: &Config, stages: &[BootStage], force: bool) -> Result<()> {
    let mut bootstrap = Bootstrap::new(config)?;
    if force {
        bootstrap = bootstrap.with_policy(UpdatePolicy::ForceRefresh);
    }
    let report = bootstrap.provision_stages(stages).await?;
    print_report(&report);
    Ok(())
}

pub(crate) fn print_report(report: &ProvisionReport) {
    if report.lock_skipped {
        println!(
            "{} {}",
            "==>".bold().yellow(),
            "Volume is held by another instance; nothing was changed".bold()
        );
        return;
    }
    if report.seeded {
        println!("{} {}", "==>".bold().blue(), "Seeded application tree".bold());
    }
    for item in &report.items {
        let (mark, detail) = match &item.outcome {
            ItemOutcome::Installed => ("✓".green().bold(), String::new()),
            ItemOutcome::Skipped => ("·".dimmed(), String::new()),
            ItemOutcome::Failed(reason) => ("✗".red().bold(), format!(" ({reason})")),
        };
        println!("  {} {:?} {}{}", mark, item.kind, item.id, detail.dimmed());
    }

    let failed = report.failures().count();
    if failed > 0 {
        println!(
            "{} {} item(s) failed; the server will start without them",
            "Warning:".yellow().bold(),
            failed
        );
    } else {
        println!("{} {}", "==>".bold().green(), "Volume is up to date".bold());
    }
}
