use std::fmt;

use thiserror::Error;

use crate::gateway::GatewayError;
use crate::storage::StorageError;

pub type CompanionResult<T> = core::result::Result<T, CompanionError>;

#[derive(Debug, Error)]
pub enum CompanionError {
    #[error("not authenticated")]
    NotAuthenticated,
    #[error("remote store unavailable: {0}")]
    RemoteUnavailable(String),
    #[error("validation failed: {0}")]
    ValidationFailed(ValidationReason),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("local store error: {0}")]
    LocalStore(#[from] StorageError),
}

impl CompanionError {
    /// Stable machine-readable name of the error class.
    pub fn kind(&self) -> &'static str {
        match self {
            CompanionError::NotAuthenticated => "not_authenticated",
            CompanionError::RemoteUnavailable(_) => "remote_unavailable",
            CompanionError::ValidationFailed(_) => "validation_failed",
            CompanionError::NotFound(_) => "not_found",
            CompanionError::LocalStore(_) => "local_store",
        }
    }

    pub fn reason(&self) -> Option<&ValidationReason> {
        match self {
            CompanionError::ValidationFailed(reason) => Some(reason),
            _ => None,
        }
    }
}

impl From<GatewayError> for CompanionError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Unauthorized(_) => CompanionError::NotAuthenticated,
            GatewayError::NotFound(what) => CompanionError::NotFound(what),
            other => CompanionError::RemoteUnavailable(other.to_string()),
        }
    }
}

impl From<ValidationReason> for CompanionError {
    fn from(reason: ValidationReason) -> Self {
        CompanionError::ValidationFailed(reason)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationReason {
    InvalidCodeFormat,
    SelfInvite,
    AlreadyPaired,
    EmptyTaskContent,
    UnknownSystemTask(usize),
    WeekOutOfRange(u8),
    MissingOnboardingField(&'static str),
    Rejected(String),
}

impl ValidationReason {
    pub fn code(&self) -> &'static str {
        match self {
            ValidationReason::InvalidCodeFormat => "invalid_code_format",
            ValidationReason::SelfInvite => "self_invite",
            ValidationReason::AlreadyPaired => "already_paired",
            ValidationReason::EmptyTaskContent => "empty_task_content",
            ValidationReason::UnknownSystemTask(_) => "unknown_system_task",
            ValidationReason::WeekOutOfRange(_) => "week_out_of_range",
            ValidationReason::MissingOnboardingField(_) => "missing_onboarding_field",
            ValidationReason::Rejected(_) => "rejected",
        }
    }
}

impl fmt::Display for ValidationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationReason::InvalidCodeFormat => {
                write!(f, "invite codes are 6 characters from the unambiguous alphabet")
            }
            ValidationReason::SelfInvite => write!(f, "you cannot redeem your own invite code"),
            ValidationReason::AlreadyPaired => write!(f, "one of the accounts is already paired"),
            ValidationReason::EmptyTaskContent => write!(f, "task content cannot be empty"),
            ValidationReason::UnknownSystemTask(index) => {
                write!(f, "no system task at position {index} this week")
            }
            ValidationReason::WeekOutOfRange(week) => {
                write!(f, "week {week} is outside 1..=40")
            }
            ValidationReason::MissingOnboardingField(field) => write!(f, "{field} is required"),
            ValidationReason::Rejected(msg) => write!(f, "{msg}"),
        }
    }
}
