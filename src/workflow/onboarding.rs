use super::StepId;
use crate::state::{Phase, StateDocument};

/// Onboarding steps in the order they must complete.
pub const ONBOARDING_SEQUENCE: [StepId; 5] = [
    StepId::DiscoverResources,
    StepId::CollectOperatorInput,
    StepId::CollectFundingToken,
    StepId::CollectDelegations,
    StepId::PrepareOperator,
];

pub fn is_step_satisfied(step: StepId, state: &StateDocument, bypass_delegation: bool) -> bool {
    match step {
        StepId::DiscoverResources => !state.profile.resources.is_empty(),
        StepId::CollectOperatorInput => state.operator_input.is_some(),
        StepId::CollectFundingToken => state.funding_token_address().is_some(),
        StepId::CollectDelegations => bypass_delegation || state.has_signed_delegation(),
        StepId::PrepareOperator => {
            state.operator_config.is_some() && state.phase() == Phase::Active
        }
        _ => true,
    }
}

/// First onboarding step whose data is still missing, or `None` once the
/// thread is ready for cycles.
pub fn next_onboarding_step(state: &StateDocument, bypass_delegation: bool) -> Option<StepId> {
    ONBOARDING_SEQUENCE
        .into_iter()
        .find(|step| !is_step_satisfied(*step, state, bypass_delegation))
}

/// Cycles may run only once every onboarding step is satisfied.
pub fn onboarding_satisfied(state: &StateDocument, bypass_delegation: bool) -> bool {
    next_onboarding_step(state, bypass_delegation).is_none()
}
