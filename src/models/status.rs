use std::{
    fmt::{Display, Formatter, Result},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeliveryStatus {
    Success,
    Failed,
}

/// Lifecycle of a consumed task as recorded in the task-state backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Received,
    Started,
    Success,
    Failure,
    Retry,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Received => "received",
            TaskState::Started => "started",
            TaskState::Success => "success",
            TaskState::Failure => "failure",
            TaskState::Retry => "retry",
        }
    }
}

impl FromStr for TaskState {
    type Err = StoreError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "received" => Ok(TaskState::Received),
            "started" => Ok(TaskState::Started),
            "success" => Ok(TaskState::Success),
            "failure" => Ok(TaskState::Failure),
            "retry" => Ok(TaskState::Retry),
            other => Err(StoreError::InvalidData(format!(
                "unknown task state '{}'",
                other
            ))),
        }
    }
}

impl Display for DeliveryStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            DeliveryStatus::Success => write!(f, "SUCCESS"),
            DeliveryStatus::Failed => write!(f, "FAILED"),
        }
    }
}

impl Display for TaskState {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        f.write_str(self.as_str())
    }
}
