// volboot/src/cli/status.rs
use clap::Args;
use colored::Colorize;
use prettytable::{format, Cell, Row, Table};
use volboot_common::config::Config;
use volboot_common::error::Result;
use volboot_core::{StatusReport, VolumeStatus};

#[derive(Args, Debug)]
pub struct Status {
    /// Print the status as JSON
    #[arg(long)]
    pub json: bool,
}

impl Status {
    pub async fn run(&self, config: &Config) -> Result<()> {
        let status = VolumeStatus::collect(config);
        if self.json {
            println!("{}", serde_json::to_string_pretty(&status)?);
            return Ok(());
        }

        println!("{} {}", "Volume:".bold(), status.volume.display());
        if status.seeded {
            println!("{} {}", "Application tree:".bold(), "seeded".green());
        } else {
            println!("{} {}", "Application tree:".bold(), "not seeded".yellow());
        }
        if let Some(holder) = &status.lock {
            println!(
                "{} held by {} (pid {}) since {}",
                "Lock:".bold(),
                holder.host,
                holder.pid,
                holder.acquired_at
            );
        }

        let mut table = Table::new();
        table.set_format(*format::consts::FORMAT_NO_BORDER_LINE_SEPARATOR);
        table.add_row(Row::new(vec![
            Cell::new("Kind").style_spec("b"),
            Cell::new("Name").style_spec("b"),
            Cell::new("State").style_spec("b"),
            Cell::new("Path").style_spec("b"),
        ]));
        add_rows(&mut table, "Plugin", &status.plugins);
        add_rows(&mut table, "Model", &status.models);
        add_rows(&mut table, "Link", &status.links);
        if table.len() > 1 {
            table.printstd();
        }

        let missing = status.missing_count();
        if missing > 0 {
            println!(
                "{}",
                format!("{missing} declared item(s) missing or incomplete").yellow()
            );
        } else {
            println!(
                "{} ({} recorded installs)",
                "Everything declared is present".green(),
                status.recorded_installs
            );
        }
        Ok(())
    }
}

fn add_rows(table: &mut Table, kind: &str, reports: &[StatusReport]) {
    for report in reports {
        let style = match report.state.as_str() {
            "present" | "symlink" => "Fg",
            "directory" => "Fc",
            "undersized" => "Fy",
            _ => "Fr",
        };
        table.add_row(Row::new(vec![
            Cell::new(kind),
            Cell::new(&report.id).style_spec("Fb"),
            Cell::new(&report.state).style_spec(style),
            Cell::new(&report.path.display().to_string()),
        ]));
    }
}
