use crate::shared::TaskId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskState {
    Submitted,
    Working,
    InputRequired,
    AuthRequired,
    Completed,
    Failed,
    Canceled,
    Rejected,
    Unknown,
}

impl TaskState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Working => "working",
            Self::InputRequired => "input-required",
            Self::AuthRequired => "auth-required",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
            Self::Rejected => "rejected",
            Self::Unknown => "unknown",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Canceled | Self::Rejected | Self::Unknown
        )
    }

    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }

    /// The task is parked on an external party (a human response or an
    /// authorization) and only a resume may move it back to `working`.
    pub fn is_awaiting_input(self) -> bool {
        matches!(self, Self::InputRequired | Self::AuthRequired)
    }

    pub fn can_transition_to(self, next: Self) -> bool {
        if self == next {
            return true;
        }
        match self {
            Self::Submitted => matches!(
                next,
                Self::Working
                    | Self::AuthRequired
                    | Self::Unknown
                    | Self::Failed
                    | Self::Canceled
                    | Self::Rejected
            ),
            Self::Working => matches!(
                next,
                Self::InputRequired
                    | Self::AuthRequired
                    | Self::Unknown
                    | Self::Completed
                    | Self::Failed
                    | Self::Canceled
                    | Self::Rejected
            ),
            Self::InputRequired | Self::AuthRequired => matches!(
                next,
                Self::Working | Self::Failed | Self::Canceled | Self::Rejected
            ),
            Self::Completed | Self::Failed | Self::Canceled | Self::Rejected | Self::Unknown => {
                false
            }
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatus {
    pub state: TaskState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: i64,
}

impl TaskStatus {
    pub fn new(state: TaskState, message: impl Into<String>, timestamp: i64) -> Self {
        Self {
            state,
            message: Some(message.into()),
            timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub status: TaskStatus,
}
