use super::InterruptRequest;
use crate::state::{OnboardingKey, StatePatch};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepId {
    Bootstrap,
    SyncState,
    Hire,
    DiscoverResources,
    CollectOperatorInput,
    CollectFundingToken,
    CollectDelegations,
    PrepareOperator,
    RunCycle,
    Fire,
    Park,
    Summarize,
}

/// Default successor of every step. Steps that branch do so through
/// [`StepOutcome::Goto`]; `summarize` ends the run.
pub const STEP_TABLE: &[(StepId, Option<StepId>)] = &[
    (StepId::Bootstrap, Some(StepId::Summarize)),
    (StepId::SyncState, Some(StepId::Summarize)),
    (StepId::Hire, Some(StepId::DiscoverResources)),
    (StepId::DiscoverResources, Some(StepId::CollectOperatorInput)),
    (StepId::CollectOperatorInput, Some(StepId::CollectFundingToken)),
    (StepId::CollectFundingToken, Some(StepId::CollectDelegations)),
    (StepId::CollectDelegations, Some(StepId::PrepareOperator)),
    (StepId::PrepareOperator, Some(StepId::Summarize)),
    (StepId::RunCycle, Some(StepId::Summarize)),
    (StepId::Fire, Some(StepId::Summarize)),
    (StepId::Park, Some(StepId::Summarize)),
    (StepId::Summarize, None),
];

impl StepId {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bootstrap => "bootstrap",
            Self::SyncState => "sync-state",
            Self::Hire => "hire",
            Self::DiscoverResources => "discover-resources",
            Self::CollectOperatorInput => "collect-operator-input",
            Self::CollectFundingToken => "collect-funding-token",
            Self::CollectDelegations => "collect-delegations",
            Self::PrepareOperator => "prepare-operator",
            Self::RunCycle => "run-cycle",
            Self::Fire => "fire",
            Self::Park => "park",
            Self::Summarize => "summarize",
        }
    }

    pub fn default_next(self) -> Option<StepId> {
        STEP_TABLE
            .iter()
            .find(|(step, _)| *step == self)
            .and_then(|(_, next)| *next)
    }

    pub fn onboarding_key(self) -> Option<OnboardingKey> {
        match self {
            Self::DiscoverResources => Some(OnboardingKey::ResourceDiscovery),
            Self::CollectOperatorInput => Some(OnboardingKey::OperatorConfiguration),
            Self::CollectFundingToken => Some(OnboardingKey::FundingToken),
            Self::CollectDelegations => Some(OnboardingKey::Delegation),
            Self::PrepareOperator => Some(OnboardingKey::ExecutionPreparation),
            _ => None,
        }
    }
}

impl std::fmt::Display for StepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a step hands back to the driver.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// Merge and move to the default successor.
    Continue(StatePatch),
    /// Merge and jump to `next`.
    Goto { patch: StatePatch, next: StepId },
    /// Merge, record the wait and end the run.
    Suspend {
        patch: StatePatch,
        request: InterruptRequest,
    },
}

impl StepOutcome {
    pub fn pass() -> Self {
        Self::Continue(StatePatch::default())
    }
}
