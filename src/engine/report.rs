use crate::command::NoOpReason;
use crate::shared::{TaskId, ThreadId};
use crate::state::{Phase, StateDocument, TaskState};
use crate::workflow::{InterruptKind, PendingInterrupt, StepId};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Reached `summarize`.
    Completed { task_state: Option<TaskState> },
    /// Stopped on a human-in-the-loop wait.
    Suspended { interrupt: PendingInterrupt },
    /// Nothing ran and nothing was written.
    Skipped(NoOpReason),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub thread_id: ThreadId,
    pub outcome: RunOutcome,
    /// Sequence of the checkpoint this run wrote, `None` for skipped runs.
    pub checkpoint_seq: Option<u64>,
    pub visited: Vec<StepId>,
    pub state: StateDocument,
}

impl RunReport {
    pub fn is_skipped(&self) -> bool {
        matches!(self.outcome, RunOutcome::Skipped(_))
    }

    pub fn pending_interrupt(&self) -> Option<&PendingInterrupt> {
        match &self.outcome {
            RunOutcome::Suspended { interrupt } => Some(interrupt),
            _ => None,
        }
    }
}

/// Point-in-time view of a thread for status surfaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadStatus {
    pub thread_id: ThreadId,
    pub phase: Phase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_state: Option<TaskState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_interrupt: Option<InterruptKind>,
    pub iteration: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_seq: Option<u64>,
    pub scheduled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval_ms: Option<u64>,
    pub busy: bool,
}
