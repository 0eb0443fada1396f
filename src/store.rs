use std::{
    fs,
    path::{Path, PathBuf},
};

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Serialize, de::DeserializeOwned};

use crate::{
    plan::{Plan, PlanStatus},
    prelude::*,
};

/// Write the document atomically: to a sibling temp file first, then rename
/// over the target.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result {
    let temp = path.with_extension("tmp");
    let contents = serde_json::to_vec_pretty(value)?;
    fs::write(&temp, contents)
        .with_context(|| format!("failed to write `{}`", temp.display()))?;
    fs::rename(&temp, path)
        .with_context(|| format!("failed to move the document into `{}`", path.display()))?;
    Ok(())
}

/// A missing document is not an error, it just means "no state yet".
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read(path)
        .with_context(|| format!("failed to read `{}`", path.display()))?;
    let value = serde_json::from_slice(&contents)
        .with_context(|| format!("failed to parse `{}`", path.display()))?;
    Ok(Some(value))
}

/// The state directory holding every persisted document.
#[derive(Clone, Debug)]
#[must_use]
pub struct StateDir {
    root: PathBuf,
}

impl StateDir {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join("plans"))
            .with_context(|| format!("failed to create the state directory `{}`", root.display()))?;
        Ok(Self { root })
    }

    pub fn plans(&self) -> PlanStore {
        PlanStore { dir: self.root.join("plans") }
    }

    pub fn balancing_path(&self) -> PathBuf {
        self.root.join("balancing.json")
    }

    pub fn mode_command_path(&self) -> PathBuf {
        self.root.join("mode_command.json")
    }
}

/// Document store for plans: `plans/active.json` plus one document per
/// historical plan id.
#[derive(Clone, Debug)]
#[must_use]
pub struct PlanStore {
    dir: PathBuf,
}

impl PlanStore {
    /// How long invalidated plans are kept around.
    const INVALIDATED_RETENTION: TimeDelta = TimeDelta::hours(24);

    /// How long finished plans are kept past their deadline.
    const FINISHED_RETENTION: TimeDelta = TimeDelta::hours(24);

    fn active_path(&self) -> PathBuf {
        self.dir.join("active.json")
    }

    fn plan_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    pub fn load_active(&self) -> Result<Option<Plan>> {
        read_json(&self.active_path())
    }

    pub fn save_active(&self, plan: &Plan) -> Result {
        write_json(&self.active_path(), plan)
    }

    pub fn clear_active(&self) -> Result {
        let path = self.active_path();
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("failed to remove `{}`", path.display()))?;
        }
        Ok(())
    }

    /// Persist a historical copy of the plan under its id.
    pub fn archive(&self, plan: &Plan) -> Result {
        write_json(&self.plan_path(&plan.id), plan)
    }

    pub fn load(&self, id: &str) -> Result<Option<Plan>> {
        read_json(&self.plan_path(id))
    }

    /// Every persisted plan except the active document, newest first.
    pub fn list(&self) -> Result<Vec<Plan>> {
        let mut plans = Vec::new();
        for entry in fs::read_dir(&self.dir)
            .with_context(|| format!("failed to list `{}`", self.dir.display()))?
        {
            let path = entry?.path();
            if path.extension().is_none_or(|extension| extension != "json")
                || path.file_name().is_some_and(|name| name == "active.json")
            {
                continue;
            }
            if let Some(plan) = read_json::<Plan>(&path)
                .inspect_err(|error| warn!(path = %path.display(), "skipping an unreadable plan: {error:#}"))
                .unwrap_or(None)
            {
                plans.push(plan);
            }
        }
        plans.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(plans)
    }

    /// Drop documents that outlived their retention.
    pub fn prune(&self, now: DateTime<Utc>) -> Result<u32> {
        let mut removed = 0;
        for plan in self.list()? {
            let expired = match plan.status {
                PlanStatus::Invalidated => {
                    now > plan.created_at + Self::INVALIDATED_RETENTION
                }
                PlanStatus::Completed | PlanStatus::Reverted | PlanStatus::Expired => {
                    now > plan.deadline + Self::FINISHED_RETENTION
                }
                PlanStatus::Pending | PlanStatus::Active => false,
            };
            if expired {
                fs::remove_file(self.plan_path(&plan.id)).with_context(|| {
                    format!("failed to prune the plan `{}`", plan.id)
                })?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::plan::{PlanKind, PlanMetadata};

    fn plan(id: &str, status: PlanStatus, created_at: DateTime<Utc>) -> Plan {
        Plan {
            id: id.to_string(),
            kind: PlanKind::Automatic,
            status,
            created_at,
            activated_at: None,
            deadline: created_at + TimeDelta::hours(24),
            holding_start: None,
            holding_end: None,
            required_soc_kwh: None,
            required_soc_percent: None,
            locked: false,
            timeline: Vec::new(),
            metadata: PlanMetadata::default(),
        }
    }

    #[test]
    fn plan_round_trips_through_the_store() {
        let directory = tempfile::tempdir().unwrap();
        let store = StateDir::open(directory.path()).unwrap().plans();
        let created_at = Utc.with_ymd_and_hms(2025, 11, 3, 12, 0, 0).unwrap();
        let original = plan("automatic-1762171200", PlanStatus::Active, created_at);
        store.save_active(&original).unwrap();
        let loaded = store.load_active().unwrap().unwrap();
        assert_eq!(loaded, original);
    }

    #[test]
    fn missing_documents_read_as_no_state() {
        let directory = tempfile::tempdir().unwrap();
        let store = StateDir::open(directory.path()).unwrap().plans();
        assert!(store.load_active().unwrap().is_none());
        assert!(store.load("nope").unwrap().is_none());
    }

    #[test]
    fn prune_respects_retention() {
        let directory = tempfile::tempdir().unwrap();
        let store = StateDir::open(directory.path()).unwrap().plans();
        let created_at = Utc.with_ymd_and_hms(2025, 11, 1, 12, 0, 0).unwrap();
        store.archive(&plan("old-invalidated", PlanStatus::Invalidated, created_at)).unwrap();
        store.archive(&plan("fresh-pending", PlanStatus::Pending, created_at)).unwrap();
        let removed = store.prune(created_at + TimeDelta::hours(30)).unwrap();
        assert_eq!(removed, 1);
        assert!(store.load("fresh-pending").unwrap().is_some());
        assert!(store.load("old-invalidated").unwrap().is_none());
    }
}
