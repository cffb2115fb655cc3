pub mod domain;
pub mod interrupt;
pub mod nodes;
pub mod onboarding;
pub mod steps;

pub use domain::{
    AgentDomain, RunContext, StepError, WorkflowSettings, DEFAULT_CYCLE_INTERVAL_MS,
    DEFAULT_MAX_STEPS_PER_RUN, DEFAULT_MIN_CYCLE_INTERVAL_MS,
};
pub use interrupt::{
    interpret_response, response_digest, validate_against_schema, InterruptKind,
    InterruptRequest, PendingInterrupt, ResumeDecision,
};
pub use onboarding::{next_onboarding_step, onboarding_satisfied, ONBOARDING_SEQUENCE};
pub use steps::{StepId, StepOutcome, STEP_TABLE};
