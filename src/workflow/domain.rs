use super::interrupt::{funding_token_schema, operator_input_schema};
use super::{InterruptKind, InterruptRequest};
use crate::command::Command;
use crate::shared::ThreadId;
use crate::state::{StateDocument, StatePatch};
use serde_json::{json, Value};

pub const DEFAULT_MAX_STEPS_PER_RUN: usize = 64;
pub const DEFAULT_CYCLE_INTERVAL_MS: u64 = 30_000;
pub const DEFAULT_MIN_CYCLE_INTERVAL_MS: u64 = 1_000;

/// Why a step gave up. Every variant ends the run with a failed task; the
/// display text becomes the task status message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StepError {
    #[error("invalid response: {0}")]
    Validation(String),
    #[error("declined by user: {0}")]
    Rejected(String),
    #[error("execution failed: {0}")]
    Execution(String),
    #[error("timed out after {waited_ms}ms waiting for {operation}")]
    Timeout { operation: String, waited_ms: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkflowSettings {
    /// Skips the delegation signing wait. Meant for non-production setups.
    pub bypass_delegation_signing: bool,
    pub cycle_interval_ms: u64,
    /// Floor for any interval, including one carried in a checkpoint.
    pub min_cycle_interval_ms: u64,
    pub max_steps_per_run: usize,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            bypass_delegation_signing: false,
            cycle_interval_ms: DEFAULT_CYCLE_INTERVAL_MS,
            min_cycle_interval_ms: DEFAULT_MIN_CYCLE_INTERVAL_MS,
            max_steps_per_run: DEFAULT_MAX_STEPS_PER_RUN,
        }
    }
}

impl WorkflowSettings {
    /// `requested` (or the configured default) raised to the floor.
    pub fn cycle_interval(&self, requested: Option<u64>) -> u64 {
        requested
            .unwrap_or(self.cycle_interval_ms)
            .max(self.min_cycle_interval_ms)
    }
}

/// Per-run facts visible to every step.
#[derive(Debug, Clone, PartialEq)]
pub struct RunContext {
    pub thread_id: ThreadId,
    pub command: Option<Command>,
    pub resume: Option<Value>,
    pub now: i64,
    pub run_seq: u64,
    pub settings: WorkflowSettings,
}

/// Domain collaborator: data sources, planners and executors live behind
/// this trait. Implementations must bound their own waits and report a
/// stalled call as [`StepError::Timeout`].
pub trait AgentDomain: Send + Sync {
    fn bootstrap(&self, _state: &StateDocument, _ctx: &RunContext) -> Result<StatePatch, StepError> {
        Ok(StatePatch::default())
    }

    /// Fills `profile.resources` (and any other profile data) for the
    /// operator to choose from.
    fn discover_resources(
        &self,
        state: &StateDocument,
        ctx: &RunContext,
    ) -> Result<StatePatch, StepError>;

    fn operator_input_request(
        &self,
        state: &StateDocument,
        _ctx: &RunContext,
    ) -> Result<InterruptRequest, StepError> {
        let resources = state
            .profile
            .resources
            .iter()
            .map(|resource| json!({ "id": resource.id, "name": resource.name }))
            .collect::<Vec<Value>>();
        Ok(InterruptRequest::new(
            InterruptKind::OperatorInput,
            "Choose a resource and the operator wallet",
            operator_input_schema(),
        )
        .with_payload(json!({ "resources": resources })))
    }

    fn funding_token_request(
        &self,
        state: &StateDocument,
        _ctx: &RunContext,
    ) -> Result<InterruptRequest, StepError> {
        let options = state.profile.tokens.as_slice();
        Ok(InterruptRequest::new(
            InterruptKind::FundingToken,
            "Choose the token that funds the operator",
            funding_token_schema(options),
        )
        .with_payload(json!({ "options": options })))
    }

    /// Builds the unsigned delegation the operator must sign. The payload
    /// must carry `chainId`, `delegatorAddress`, `delegateeAddress` and a
    /// single-element `delegationsToSign` array.
    fn delegation_request(
        &self,
        state: &StateDocument,
        ctx: &RunContext,
    ) -> Result<InterruptRequest, StepError>;

    fn prepare_execution(
        &self,
        _state: &StateDocument,
        _ctx: &RunContext,
    ) -> Result<StatePatch, StepError> {
        Ok(StatePatch::default())
    }

    /// One execution cycle. The returned patch is merged as-is; iteration
    /// bookkeeping is added by the caller.
    fn run_cycle(&self, state: &StateDocument, ctx: &RunContext) -> Result<StatePatch, StepError>;
}
