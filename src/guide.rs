use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::storage::StorageError;
use crate::types::Role;

/// Read-only weekly content: which system tasks exist for a week and role.
pub trait WeeklyGuide: Send + Sync {
    fn system_tasks(&self, week: u8, role: Role) -> Vec<String>;
}

/// Guide with no content; every week has zero system tasks.
pub struct EmptyGuide;

impl WeeklyGuide for EmptyGuide {
    fn system_tasks(&self, _week: u8, _role: Role) -> Vec<String> {
        Vec::new()
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct WeeklyTasks {
    #[serde(default)]
    pub dad: Vec<String>,
    #[serde(default)]
    pub mom: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeeklyContent {
    pub week: u8,
    #[serde(default)]
    pub baby_size: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub tasks: WeeklyTasks,
    #[serde(default)]
    pub tips: Vec<String>,
}

/// Guide loaded from a JSON array of [`WeeklyContent`].
pub struct JsonGuide {
    weeks: BTreeMap<u8, WeeklyContent>,
}

impl JsonGuide {
    pub fn load(path: &Path) -> Result<Self, StorageError> {
        let contents = fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    pub fn from_json(contents: &str) -> Result<Self, StorageError> {
        let entries: Vec<WeeklyContent> = serde_json::from_str(contents)?;
        let weeks = entries.into_iter().map(|c| (c.week, c)).collect();
        Ok(Self { weeks })
    }

    pub fn week(&self, week: u8) -> Option<&WeeklyContent> {
        self.weeks.get(&week)
    }
}

impl WeeklyGuide for JsonGuide {
    fn system_tasks(&self, week: u8, role: Role) -> Vec<String> {
        self.weeks
            .get(&week)
            .map(|content| match role {
                Role::Dad => content.tasks.dad.clone(),
                Role::Mom => content.tasks.mom.clone(),
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_guide_picks_tasks_by_role() {
        let guide = JsonGuide::from_json(
            r#"[{"week": 12, "babySize": "lime", "summary": "", "tasks": {"dad": ["book scan"], "mom": ["rest", "walk"]}, "tips": []}]"#,
        )
        .unwrap();
        assert_eq!(guide.system_tasks(12, Role::Dad), vec!["book scan".to_string()]);
        assert_eq!(guide.system_tasks(12, Role::Mom).len(), 2);
        assert!(guide.system_tasks(13, Role::Mom).is_empty());
        assert_eq!(guide.week(12).and_then(|w| w.baby_size.as_deref()), Some("lime"));
    }
}
