use super::{
    ActivityEvent, DelegationBundle, FundingTokenInput, OnboardingFlowStatus, OnboardingKey,
    OnboardingPosition, OperatorConfig, OperatorInput, PhaseTransition, Resource, SharedList,
    TaskStatus, TelemetryEntry, TransactionRecord,
};
use crate::shared::TaskId;
use crate::workflow::PendingInterrupt;
use serde_json::Value;
use std::sync::Arc;

/// Partial update produced by a step. `None` leaves the section alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatePatch {
    pub lifecycle: Option<PhaseTransition>,
    pub onboarding: Option<OnboardingUpdate>,
    pub onboarding_flow: Option<OnboardingFlowPatch>,
    pub task: Option<TaskPatch>,
    pub activity: Option<ActivityPatch>,
    pub operator_input: Option<OperatorInput>,
    pub funding_token_input: Option<FundingTokenInput>,
    pub operator_config: Option<OperatorConfig>,
    pub delegation_bundle: Option<DelegationBundle>,
    pub profile: Option<ProfilePatch>,
    pub metrics: Option<MetricsPatch>,
    pub transaction_history: Option<SharedList<TransactionRecord>>,
    pub private: Option<PrivatePatch>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnboardingUpdate {
    Advance(OnboardingPosition),
    Clear,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OnboardingFlowPatch {
    pub status: Option<OnboardingFlowStatus>,
    pub started_at: Option<i64>,
    pub completed_steps: Option<SharedList<OnboardingKey>>,
    pub completed_at: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskPatch {
    /// A different id starts a new task.
    pub id: Option<TaskId>,
    pub status: Option<TaskStatus>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActivityPatch {
    pub events: Option<SharedList<ActivityEvent>>,
    pub telemetry: Option<SharedList<TelemetryEntry>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfilePatch {
    pub agent_income: Option<f64>,
    pub aum: Option<f64>,
    pub total_users: Option<u64>,
    pub apy: Option<f64>,
    pub chains: Option<SharedList<String>>,
    pub protocols: Option<SharedList<String>>,
    pub tokens: Option<SharedList<String>>,
    pub resources: Option<SharedList<Resource>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsPatch {
    pub iteration: Option<u64>,
    pub cycles_since_rebalance: Option<u64>,
    pub stale_cycles: Option<u64>,
    pub last_cycle_at: Option<i64>,
    pub last_action: Option<String>,
    pub latest_snapshot: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrivatePatch {
    pub bootstrapped: Option<bool>,
    pub last_applied_command_mutation_id: Option<String>,
    pub last_applied_sync_mutation_id: Option<String>,
    pub cron_scheduled: Option<bool>,
    pub cycle_interval_ms: Option<u64>,
    pub pending_interrupt: Option<InterruptSlot>,
    pub last_resume_digest: Option<String>,
}

impl PrivatePatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InterruptSlot {
    Pending(PendingInterrupt),
    /// The wait was answered (or abandoned); clears the pending interrupt.
    Resolved,
}

impl StatePatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn task_status(status: TaskStatus) -> Self {
        Self {
            task: Some(TaskPatch {
                id: None,
                status: Some(status),
            }),
            ..Self::default()
        }
    }

    pub fn event(event: ActivityEvent) -> Self {
        Self {
            activity: Some(ActivityPatch {
                events: Some(Arc::new(vec![event])),
                telemetry: None,
            }),
            ..Self::default()
        }
    }

    pub fn private(private: PrivatePatch) -> Self {
        Self {
            private: Some(private),
            ..Self::default()
        }
    }

    /// Folds `later` on top of `self` so both can be merged in one pass.
    /// Scalars from `later` win; list deltas are concatenated in order.
    pub fn combine(self, later: StatePatch) -> StatePatch {
        StatePatch {
            lifecycle: later.lifecycle.or(self.lifecycle),
            onboarding: later.onboarding.or(self.onboarding),
            onboarding_flow: combine_with(self.onboarding_flow, later.onboarding_flow, |a, b| {
                OnboardingFlowPatch {
                    status: b.status.or(a.status),
                    started_at: b.started_at.or(a.started_at),
                    completed_steps: concat_lists(a.completed_steps, b.completed_steps),
                    completed_at: b.completed_at.or(a.completed_at),
                }
            }),
            task: combine_with(self.task, later.task, |a, b| TaskPatch {
                id: b.id.or(a.id),
                status: b.status.or(a.status),
            }),
            activity: combine_with(self.activity, later.activity, |a, b| ActivityPatch {
                events: concat_lists(a.events, b.events),
                telemetry: concat_lists(a.telemetry, b.telemetry),
            }),
            operator_input: later.operator_input.or(self.operator_input),
            funding_token_input: later.funding_token_input.or(self.funding_token_input),
            operator_config: later.operator_config.or(self.operator_config),
            delegation_bundle: later.delegation_bundle.or(self.delegation_bundle),
            profile: combine_with(self.profile, later.profile, |a, b| ProfilePatch {
                agent_income: b.agent_income.or(a.agent_income),
                aum: b.aum.or(a.aum),
                total_users: b.total_users.or(a.total_users),
                apy: b.apy.or(a.apy),
                chains: concat_lists(a.chains, b.chains),
                protocols: concat_lists(a.protocols, b.protocols),
                tokens: concat_lists(a.tokens, b.tokens),
                resources: concat_lists(a.resources, b.resources),
            }),
            metrics: combine_with(self.metrics, later.metrics, |a, b| MetricsPatch {
                iteration: b.iteration.or(a.iteration),
                cycles_since_rebalance: b.cycles_since_rebalance.or(a.cycles_since_rebalance),
                stale_cycles: b.stale_cycles.or(a.stale_cycles),
                last_cycle_at: b.last_cycle_at.or(a.last_cycle_at),
                last_action: b.last_action.or(a.last_action),
                latest_snapshot: b.latest_snapshot.or(a.latest_snapshot),
            }),
            transaction_history: concat_lists(self.transaction_history, later.transaction_history),
            private: combine_with(self.private, later.private, |a, b| PrivatePatch {
                bootstrapped: b.bootstrapped.or(a.bootstrapped),
                last_applied_command_mutation_id: b
                    .last_applied_command_mutation_id
                    .or(a.last_applied_command_mutation_id),
                last_applied_sync_mutation_id: b
                    .last_applied_sync_mutation_id
                    .or(a.last_applied_sync_mutation_id),
                cron_scheduled: b.cron_scheduled.or(a.cron_scheduled),
                cycle_interval_ms: b.cycle_interval_ms.or(a.cycle_interval_ms),
                pending_interrupt: b.pending_interrupt.or(a.pending_interrupt),
                last_resume_digest: b.last_resume_digest.or(a.last_resume_digest),
            }),
        }
    }
}

fn combine_with<T>(earlier: Option<T>, later: Option<T>, both: impl FnOnce(T, T) -> T) -> Option<T> {
    match (earlier, later) {
        (Some(a), Some(b)) => Some(both(a, b)),
        (a, b) => b.or(a),
    }
}

fn concat_lists<T: Clone>(
    earlier: Option<SharedList<T>>,
    later: Option<SharedList<T>>,
) -> Option<SharedList<T>> {
    match (earlier, later) {
        (Some(a), Some(b)) => {
            let mut joined = Vec::with_capacity(a.len() + b.len());
            joined.extend(a.iter().cloned());
            joined.extend(b.iter().cloned());
            Some(Arc::new(joined))
        }
        (a, b) => b.or(a),
    }
}
