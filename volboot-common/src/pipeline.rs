// volboot-common/src/pipeline.rs
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::BootError;

/// Stages of the boot sequence, in the order they are entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BootStage {
    Uninitialized,
    Seeding,
    Updating,
    InstallingPlugins,
    FetchingModels,
    LinkingAssets,
    Launching,
    Serving,
    /// Serving, but some provisioning items failed.
    Degraded,
    Aborted,
}

impl fmt::Display for BootStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BootStage::Uninitialized => "uninitialized",
            BootStage::Seeding => "seeding",
            BootStage::Updating => "updating",
            BootStage::InstallingPlugins => "installing-plugins",
            BootStage::FetchingModels => "fetching-models",
            BootStage::LinkingAssets => "linking-assets",
            BootStage::Launching => "launching",
            BootStage::Serving => "serving",
            BootStage::Degraded => "degraded",
            BootStage::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    AppTree,
    Plugin,
    Model,
    Download,
    ToolCache,
    Link,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum ItemOutcome {
    /// Fetched, placed, updated or linked during this run.
    Installed,
    /// Already present; nothing was touched.
    Skipped,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemReport {
    pub kind: ItemKind,
    pub id: String,
    pub outcome: ItemOutcome,
}

/// What one provisioning pass did to the volume.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvisionReport {
    pub seeded: bool,
    /// Provisioning was skipped because another instance held the volume.
    pub lock_skipped: bool,
    pub items: Vec<ItemReport>,
}

impl ProvisionReport {
    pub fn record(&mut self, kind: ItemKind, id: impl Into<String>, outcome: ItemOutcome) {
        self.items.push(ItemReport {
            kind,
            id: id.into(),
            outcome,
        });
    }

    pub fn record_result(
        &mut self,
        kind: ItemKind,
        id: impl Into<String>,
        result: &std::result::Result<ItemOutcome, BootError>,
    ) {
        let outcome = match result {
            Ok(outcome) => outcome.clone(),
            Err(e) => ItemOutcome::Failed(e.to_string()),
        };
        self.record(kind, id, outcome);
    }

    pub fn failures(&self) -> impl Iterator<Item = &ItemReport> {
        self.items
            .iter()
            .filter(|item| matches!(item.outcome, ItemOutcome::Failed(_)))
    }

    pub fn count(&self, kind: ItemKind, outcome: &ItemOutcome) -> usize {
        self.items
            .iter()
            .filter(|item| item.kind == kind && &item.outcome == outcome)
            .count()
    }

    pub fn is_degraded(&self) -> bool {
        self.lock_skipped || self.failures().next().is_some()
    }

    pub fn outcome_of(&self, kind: ItemKind, id: &str) -> Option<&ItemOutcome> {
        self.items
            .iter()
            .find(|item| item.kind == kind && item.id == id)
            .map(|item| &item.outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_mark_report_degraded() {
        let mut report = ProvisionReport::default();
        report.record(ItemKind::Plugin, "a", ItemOutcome::Installed);
        assert!(!report.is_degraded());
        report.record_result(
            ItemKind::Plugin,
            "b",
            &Err(BootError::DownloadError("b".into(), "u".into(), "404".into())),
        );
        assert!(report.is_degraded());
        assert_eq!(report.failures().count(), 1);
        assert_eq!(report.count(ItemKind::Plugin, &ItemOutcome::Installed), 1);
        assert!(matches!(
            report.outcome_of(ItemKind::Plugin, "b"),
            Some(ItemOutcome::Failed(_))
        ));
    }

    #[test]
    fn stages_are_ordered() {
        assert!(BootStage::Seeding < BootStage::Updating);
        assert!(BootStage::LinkingAssets < BootStage::Launching);
        assert_eq!(BootStage::InstallingPlugins.to_string(), "installing-plugins");
    }
}
