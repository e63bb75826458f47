//! Weekly task list.
//!
//! Tasks do not reconcile: signed-in sessions read and write only the
//! remote store, guests only the device store.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;

use crate::error::{CompanionError, CompanionResult, ValidationReason};
use crate::gateway::RemoteGateway;
use crate::guide::WeeklyGuide;
use crate::identity::Session;
use crate::local::LocalStore;
use crate::types::{
    CustomTask, Identity, Role, TaskKind, TaskRecord, TaskUpsert, system_task_key,
};
use crate::week;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemTaskView {
    pub key: String,
    pub title: String,
    pub is_completed: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomTaskView {
    pub id: String,
    pub content: String,
    pub is_completed: bool,
}

impl From<CustomTask> for CustomTaskView {
    fn from(task: CustomTask) -> Self {
        Self {
            id: task.id,
            content: task.content,
            is_completed: task.is_completed,
        }
    }
}

impl From<TaskRecord> for CustomTaskView {
    fn from(record: TaskRecord) -> Self {
        Self {
            id: record.id,
            content: record.content.unwrap_or_default(),
            is_completed: record.is_completed,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct WeekTasks {
    pub week: u8,
    pub role: Role,
    pub system: Vec<SystemTaskView>,
    pub custom: Vec<CustomTaskView>,
}

enum Backend<'a> {
    Local,
    Remote(&'a Identity, &'a Arc<dyn RemoteGateway>),
}

#[derive(Clone)]
pub struct TaskService {
    local: LocalStore,
    gateway: Option<Arc<dyn RemoteGateway>>,
    guide: Arc<dyn WeeklyGuide>,
}

impl TaskService {
    pub fn new(
        local: LocalStore,
        gateway: Option<Arc<dyn RemoteGateway>>,
        guide: Arc<dyn WeeklyGuide>,
    ) -> Self {
        Self {
            local,
            gateway,
            guide,
        }
    }

    fn backend<'a>(&'a self, session: &'a Session) -> Backend<'a> {
        match (session.identity(), self.gateway.as_ref()) {
            (Some(identity), Some(gateway)) => Backend::Remote(identity, gateway),
            _ => Backend::Local,
        }
    }

    fn check_week(week: u8) -> CompanionResult<()> {
        if !week::is_valid_week(week) {
            return Err(ValidationReason::WeekOutOfRange(week).into());
        }
        Ok(())
    }

    pub async fn list_tasks(
        &self,
        session: &Session,
        week: u8,
        role: Role,
    ) -> CompanionResult<WeekTasks> {
        Self::check_week(week)?;
        let titles = self.guide.system_tasks(week, role);

        let (completed, custom): (BTreeSet<String>, Vec<CustomTaskView>) =
            match self.backend(session) {
                Backend::Local => {
                    let completed = self
                        .local
                        .load_task_completion()?
                        .into_iter()
                        .filter_map(|(key, done)| done.then_some(key))
                        .collect();
                    let custom = self
                        .local
                        .load_custom_tasks(week, role)?
                        .into_iter()
                        .map(CustomTaskView::from)
                        .collect();
                    (completed, custom)
                }
                Backend::Remote(identity, gateway) => {
                    let records = gateway.get_tasks(identity, &identity.user_id, week).await?;
                    let (system, custom): (Vec<_>, Vec<_>) =
                        records.into_iter().partition(|r| r.kind == TaskKind::System);
                    let completed = system
                        .into_iter()
                        .filter(|r| r.is_completed)
                        .filter_map(|r| r.task_key)
                        .collect();
                    let custom = custom.into_iter().map(CustomTaskView::from).collect();
                    (completed, custom)
                }
            };

        let system = titles
            .into_iter()
            .enumerate()
            .map(|(index, title)| {
                let key = system_task_key(week, role, index);
                SystemTaskView {
                    is_completed: completed.contains(&key),
                    key,
                    title,
                }
            })
            .collect();

        Ok(WeekTasks {
            week,
            role,
            system,
            custom,
        })
    }

    /// Marks the `index`-th system task of the week. Repeated toggles update
    /// the same record.
    pub async fn toggle_system_task(
        &self,
        session: &Session,
        week: u8,
        role: Role,
        index: usize,
        completed: bool,
    ) -> CompanionResult<SystemTaskView> {
        Self::check_week(week)?;
        let key = system_task_key(week, role, index);
        let title = self
            .guide
            .system_tasks(week, role)
            .into_iter()
            .nth(index)
            .ok_or(ValidationReason::UnknownSystemTask(index))?;

        match self.backend(session) {
            Backend::Local => self.local.save_task_completion(&key, completed)?,
            Backend::Remote(identity, gateway) => {
                let upsert = TaskUpsert {
                    id: None,
                    owner_id: identity.user_id.clone(),
                    week,
                    kind: TaskKind::System,
                    task_key: Some(key.clone()),
                    content: None,
                    is_completed: completed,
                };
                gateway.upsert_task(identity, &upsert).await?;
            }
        }
        Ok(SystemTaskView {
            key,
            title,
            is_completed: completed,
        })
    }

    pub async fn add_custom_task(
        &self,
        session: &Session,
        week: u8,
        role: Role,
        content: &str,
    ) -> CompanionResult<CustomTaskView> {
        Self::check_week(week)?;
        let content = content.trim();
        if content.is_empty() {
            return Err(ValidationReason::EmptyTaskContent.into());
        }

        match self.backend(session) {
            Backend::Local => Ok(self.local.add_custom_task(week, role, content)?.into()),
            Backend::Remote(identity, gateway) => {
                let upsert = TaskUpsert {
                    id: None,
                    owner_id: identity.user_id.clone(),
                    week,
                    kind: TaskKind::Custom,
                    task_key: None,
                    content: Some(content.to_string()),
                    is_completed: false,
                };
                Ok(gateway.upsert_task(identity, &upsert).await?.into())
            }
        }
    }

    pub async fn toggle_custom_task(
        &self,
        session: &Session,
        week: u8,
        id: &str,
        completed: bool,
    ) -> CompanionResult<CustomTaskView> {
        match self.backend(session) {
            Backend::Local => Ok(self.local.toggle_custom_task(id, completed)?.into()),
            Backend::Remote(identity, gateway) => {
                let upsert = TaskUpsert {
                    id: Some(id.to_string()),
                    owner_id: identity.user_id.clone(),
                    week,
                    kind: TaskKind::Custom,
                    task_key: None,
                    content: None,
                    is_completed: completed,
                };
                Ok(gateway.upsert_task(identity, &upsert).await?.into())
            }
        }
    }

    /// Deleting a task that does not exist is not an error.
    pub async fn delete_custom_task(&self, session: &Session, id: &str) -> CompanionResult<()> {
        match self.backend(session) {
            Backend::Local => {
                self.local.delete_custom_task(id)?;
            }
            Backend::Remote(identity, gateway) => {
                gateway.delete_task(identity, &identity.user_id, id).await?;
            }
        }
        Ok(())
    }

    /// The linked partner's task records for `week`; empty when unpaired.
    pub async fn partner_tasks(&self, session: &Session, week: u8) -> CompanionResult<Vec<TaskRecord>> {
        Self::check_week(week)?;
        let identity = session.require_identity()?;
        let gateway = self
            .gateway
            .as_ref()
            .ok_or_else(|| CompanionError::RemoteUnavailable("no remote store configured".into()))?;

        let partner = gateway
            .get_profile(identity, &identity.user_id)
            .await?
            .and_then(|p| p.partner_id);
        match partner {
            Some(partner_id) => Ok(gateway.get_tasks(identity, &partner_id, week).await?),
            None => Ok(Vec::new()),
        }
    }
}
