//! Persistent run report artifact (`provision-report.json`).

use crate::errors::StageFailure;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

pub const REPORT_FILE_NAME: &str = "provision-report.json";

fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Planned,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRecord {
    pub name: String,
    pub status: StageStatus,
    /// Steps completed, in order.
    pub steps: Vec<String>,
    pub failed_step: Option<String>,
    pub error_kind: Option<String>,
    pub error: Option<String>,
}

impl StageRecord {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: StageStatus::Running,
            steps: Vec::new(),
            failed_step: None,
            error_kind: None,
            error: None,
        }
    }

    pub fn step_completed(&mut self, step: impl ToString) {
        self.steps.push(step.to_string());
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub started_at_unix_ms: u64,
    pub finished_at_unix_ms: Option<u64>,
    pub dry_run: bool,
    pub stages: Vec<StageRecord>,
    pub success: bool,
}

impl RunReport {
    pub fn new(dry_run: bool) -> Self {
        Self {
            started_at_unix_ms: now_unix_ms(),
            finished_at_unix_ms: None,
            dry_run,
            stages: Vec::new(),
            success: false,
        }
    }

    pub fn stage_started(&mut self, name: &str) -> &mut StageRecord {
        self.stages.push(StageRecord::new(name));
        let idx = self.stages.len() - 1;
        &mut self.stages[idx]
    }

    pub fn stage_planned(&mut self, name: &str, steps: Vec<String>) {
        let mut record = StageRecord::new(name);
        record.status = StageStatus::Planned;
        record.steps = steps;
        self.stages.push(record);
    }

    pub fn stage_failed(&mut self, failure: &StageFailure) {
        if let Some(record) = self.stages.iter_mut().rev().find(|r| r.name == failure.stage) {
            record.status = StageStatus::Failed;
            record.failed_step = Some(failure.step.clone());
            record.error_kind = Some(failure.error.kind().to_string());
            record.error = Some(failure.error.to_string());
        }
    }

    pub fn stage_completed(&mut self, name: &str) {
        if let Some(record) = self.stages.iter_mut().rev().find(|r| r.name == name) {
            record.status = StageStatus::Completed;
        }
    }

    pub fn finish(&mut self, success: bool) {
        self.success = success;
        self.finished_at_unix_ms = Some(now_unix_ms());
    }

    pub fn completed_stages(&self) -> Vec<&str> {
        self.stages
            .iter()
            .filter(|r| r.status == StageStatus::Completed)
            .map(|r| r.name.as_str())
            .collect()
    }

    pub fn write_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create report dir {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self).context("serialize run report")?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).with_context(|| format!("write {}", tmp.display()))?;
        fs::rename(&tmp, path).with_context(|| format!("rename to {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ProvisionError;
    use std::path::PathBuf;

    #[test]
    fn report_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut report = RunReport::new(false);
        report.stage_started("flash").step_completed("FetchZeroFill");
        report.stage_completed("flash");
        report.stage_started("disk");
        report.stage_failed(&StageFailure::new(
            "disk",
            "CheckDiskPresent",
            ProvisionError::DeviceNotFound {
                path: PathBuf::from("/dev/nvme0n1"),
            },
        ));
        report.finish(false);

        let path = dir.path().join(REPORT_FILE_NAME);
        report.write_to(&path).unwrap();
        let loaded: RunReport =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();

        assert_eq!(loaded.completed_stages(), vec!["flash"]);
        assert_eq!(loaded.stages[1].status, StageStatus::Failed);
        assert_eq!(loaded.stages[1].failed_step.as_deref(), Some("CheckDiskPresent"));
        assert_eq!(loaded.stages[1].error_kind.as_deref(), Some("DeviceNotFound"));
        assert!(!loaded.success);
        assert!(loaded.finished_at_unix_ms.is_some());
    }
}
