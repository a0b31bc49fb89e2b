use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::arch::Architecture;
use crate::error::FailureReason;
use crate::hash::Fingerprint;
use crate::result::TaskResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Complete,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Complete | TaskStatus::Failed)
    }

    /// `pending -> processing -> {complete, failed}`; nothing else.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::Processing)
                | (TaskStatus::Processing, TaskStatus::Complete)
                | (TaskStatus::Processing, TaskStatus::Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Complete => "complete",
            TaskStatus::Failed => "failed",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub status: TaskStatus,
    pub input_fingerprint: Fingerprint,
    pub package_identifier: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    pub replacement_requests: BTreeMap<String, String>,
    pub declared_architecture: Architecture,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<FailureReason>,
    /// Display form of `failure_reason`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Caller-supplied fields of a new task.
#[derive(Clone, Debug)]
pub struct NewTask {
    pub input_fingerprint: Fingerprint,
    pub package_identifier: String,
    pub filename: Option<String>,
    pub replacement_requests: BTreeMap<String, String>,
    pub declared_architecture: Architecture,
}

#[derive(Debug, thiserror::Error)]
pub enum TransitionError {
    #[error("task {0} not found")]
    NotFound(String),

    #[error("task {id}: illegal transition {from:?} -> {to:?}")]
    Illegal {
        id: String,
        from: TaskStatus,
        to: TaskStatus,
    },
}
