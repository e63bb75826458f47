use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Which parent the account belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Dad,
    Mom,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Dad => "dad",
            Role::Mom => "mom",
        }
    }

    pub fn default_nickname(&self) -> &'static str {
        match self {
            Role::Dad => "Dad-to-be",
            Role::Mom => "Mom-to-be",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dad" => Ok(Role::Dad),
            "mom" => Ok(Role::Mom),
            other => Err(format!("unknown role '{other}', expected 'dad' or 'mom'")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque authenticated identity handed out by the identity provider.
#[derive(Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub access_token: Option<String>,
}

impl Identity {
    pub fn new(user_id: UserId, access_token: Option<String>) -> Self {
        Self {
            user_id,
            access_token,
        }
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("user_id", &self.user_id)
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// The per-user settings every screen renders against.
///
/// A config is complete once both `role` and `due_date` are present;
/// incomplete configs route the user to onboarding.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserConfig {
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default, with = "flexible_date")]
    pub due_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
}

impl UserConfig {
    pub fn new(role: Role, due_date: NaiveDate, nickname: Option<String>) -> Self {
        Self {
            role: Some(role),
            due_date: Some(due_date),
            nickname,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.role.is_some() && self.due_date.is_some()
    }

    /// Nickname to display, falling back to the role default.
    pub fn display_nickname(&self) -> String {
        match (&self.nickname, self.role) {
            (Some(n), _) if !n.trim().is_empty() => n.clone(),
            (_, Some(role)) => role.default_nickname().to_string(),
            _ => String::new(),
        }
    }
}

/// Remote profile row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: UserId,
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default, with = "flexible_date")]
    pub due_date: Option<NaiveDate>,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub partner_id: Option<UserId>,
}

impl Profile {
    pub fn empty(id: UserId) -> Self {
        Self {
            id,
            role: None,
            due_date: None,
            nickname: None,
            partner_id: None,
        }
    }

    pub fn config(&self) -> UserConfig {
        UserConfig {
            role: self.role,
            due_date: self.due_date,
            nickname: self.nickname.clone(),
        }
    }
}

/// Fields written by a profile upsert. `partner_id` is never part of it:
/// the partner link only moves through the pairing procedures.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ProfileUpdate {
    pub id: UserId,
    pub role: Option<Role>,
    #[serde(with = "flexible_date")]
    pub due_date: Option<NaiveDate>,
    pub nickname: Option<String>,
}

impl ProfileUpdate {
    pub fn from_config(id: UserId, config: &UserConfig) -> Self {
        Self {
            id,
            role: config.role,
            due_date: config.due_date,
            nickname: config.nickname.clone(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    System,
    Custom,
}

/// Remote task row. For `System` tasks `(owner_id, week, task_key)` is unique.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    #[serde(rename = "user_id")]
    pub owner_id: UserId,
    pub week: u8,
    #[serde(rename = "task_type")]
    pub kind: TaskKind,
    #[serde(rename = "task_id", default)]
    pub task_key: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub is_completed: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TaskUpsert {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "user_id")]
    pub owner_id: UserId,
    pub week: u8,
    #[serde(rename = "task_type")]
    pub kind: TaskKind,
    #[serde(rename = "task_id", skip_serializing_if = "Option::is_none")]
    pub task_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub is_completed: bool,
}

/// Device-local custom task, as kept by guests.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomTask {
    pub id: String,
    pub week: u8,
    pub role: Role,
    pub content: String,
    pub is_completed: bool,
    pub created_at: i64,
}

/// What a paired user sees about their partner.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartnerStatus {
    pub partner_id: UserId,
    pub nickname: String,
    pub role: Option<Role>,
}

/// Key of the `index`-th system task for `(week, role)`.
pub fn system_task_key(week: u8, role: Role, index: usize) -> String {
    format!("w{week}-{role}-{index}")
}

/// Dates arrive either as `YYYY-MM-DD` (local store) or as a full
/// timestamp (remote column); only the calendar date is kept.
pub(crate) mod flexible_date {
    use chrono::NaiveDate;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<NaiveDate>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(date) => serializer.serialize_str(&date.format("%Y-%m-%d").to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw {
            None => Ok(None),
            Some(s) if s.trim().is_empty() => Ok(None),
            Some(s) => parse(&s).map(Some).map_err(serde::de::Error::custom),
        }
    }

    pub fn parse(s: &str) -> Result<NaiveDate, String> {
        let s = s.trim();
        let head = s.get(..10).unwrap_or(s);
        NaiveDate::parse_from_str(head, "%Y-%m-%d").map_err(|e| format!("invalid date '{s}': {e}"))
    }
}

pub use flexible_date::parse as parse_date;
