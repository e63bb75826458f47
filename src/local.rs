//! Typed view over the device store: user config and guest task state.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use ulid::Ulid;

use crate::error::{CompanionError, CompanionResult};
use crate::storage::{KeyValueStore, StorageError};
use crate::types::{CustomTask, Role, UserConfig};

pub const CONFIG_KEY: &str = "parenting_app_config";
pub const TASKS_KEY: &str = "parenting_app_tasks";
pub const CUSTOM_TASKS_KEY: &str = "parenting_app_custom_tasks";

#[derive(Clone)]
pub struct LocalStore {
    inner: Arc<dyn KeyValueStore>,
}

impl LocalStore {
    pub fn new(inner: Arc<dyn KeyValueStore>) -> Self {
        Self { inner }
    }

    /// A value that no longer decodes is treated as absent.
    fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        let Some(value) = self.inner.get(key)? else {
            return Ok(None);
        };
        match serde_json::from_value(value) {
            Ok(parsed) => Ok(Some(parsed)),
            Err(err) => {
                tracing::warn!(key, error = %err, "ignoring undecodable local value");
                Ok(None)
            }
        }
    }

    fn write<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        self.inner.set(key, serde_json::to_value(value)?)
    }

    pub fn load_user_config(&self) -> Result<UserConfig, StorageError> {
        Ok(self.read(CONFIG_KEY)?.unwrap_or_default())
    }

    pub fn save_user_config(&self, config: &UserConfig) -> Result<(), StorageError> {
        self.write(CONFIG_KEY, config)
    }

    pub fn load_task_completion(&self) -> Result<BTreeMap<String, bool>, StorageError> {
        Ok(self.read(TASKS_KEY)?.unwrap_or_default())
    }

    pub fn save_task_completion(&self, task_key: &str, completed: bool) -> Result<(), StorageError> {
        let mut map = self.load_task_completion()?;
        map.insert(task_key.to_string(), completed);
        self.write(TASKS_KEY, &map)
    }

    fn load_all_custom_tasks(&self) -> Result<Vec<CustomTask>, StorageError> {
        Ok(self.read(CUSTOM_TASKS_KEY)?.unwrap_or_default())
    }

    pub fn load_custom_tasks(&self, week: u8, role: Role) -> Result<Vec<CustomTask>, StorageError> {
        Ok(self
            .load_all_custom_tasks()?
            .into_iter()
            .filter(|t| t.week == week && t.role == role)
            .collect())
    }

    pub fn add_custom_task(
        &self,
        week: u8,
        role: Role,
        content: &str,
    ) -> Result<CustomTask, StorageError> {
        let mut tasks = self.load_all_custom_tasks()?;
        let task = CustomTask {
            id: Ulid::new().to_string(),
            week,
            role,
            content: content.to_string(),
            is_completed: false,
            created_at: Utc::now().timestamp_millis(),
        };
        tasks.push(task.clone());
        self.write(CUSTOM_TASKS_KEY, &tasks)?;
        Ok(task)
    }

    pub fn toggle_custom_task(&self, id: &str, completed: bool) -> CompanionResult<CustomTask> {
        let mut tasks = self.load_all_custom_tasks()?;
        let updated = {
            let task = tasks
                .iter_mut()
                .find(|t| t.id == id)
                .ok_or_else(|| CompanionError::NotFound(format!("task {id}")))?;
            task.is_completed = completed;
            task.clone()
        };
        self.write(CUSTOM_TASKS_KEY, &tasks)?;
        Ok(updated)
    }

    /// Removing an id that is not there leaves the store untouched.
    pub fn delete_custom_task(&self, id: &str) -> Result<bool, StorageError> {
        let mut tasks = self.load_all_custom_tasks()?;
        let before = tasks.len();
        tasks.retain(|t| t.id != id);
        if tasks.len() == before {
            return Ok(false);
        }
        self.write(CUSTOM_TASKS_KEY, &tasks)?;
        Ok(true)
    }
}
