use super::policy::{Guard, MergePolicy, RetentionLimits, Section, SECTION_POLICIES};
use super::{
    InterruptSlot, Metrics, OnboardingFlow, OnboardingFlowPatch, OnboardingFlowStatus,
    OnboardingUpdate, Phase, PhaseTransition, SharedList, StateDocument, StatePatch, Task,
    TaskPatch, TaskState, TaskStatus,
};
use std::sync::Arc;

/// Merges with the default retention window.
pub fn merge(current: &StateDocument, patch: &StatePatch) -> StateDocument {
    Merger::default().merge(current, patch)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Merger {
    limits: RetentionLimits,
}

impl Merger {
    pub fn new(limits: RetentionLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> RetentionLimits {
        self.limits
    }

    /// Pure and total. Sub-fields that would break an invariant keep their
    /// pre-patch value; the rest of the patch is still applied.
    pub fn merge(&self, current: &StateDocument, patch: &StatePatch) -> StateDocument {
        let mut next = current.clone();
        for (section, policy) in SECTION_POLICIES {
            match *policy {
                MergePolicy::Guarded(guard) => apply_guarded(guard, &mut next, patch),
                MergePolicy::Replace => apply_replace(*section, &mut next, patch),
                MergePolicy::AppendOrResync | MergePolicy::Bounded(_) => {
                    self.apply_list(*section, *policy, &mut next, patch)
                }
                MergePolicy::Nested => apply_nested(*section, &mut next, patch),
            }
        }
        next
    }

    fn apply_list(
        &self,
        section: Section,
        policy: MergePolicy,
        next: &mut StateDocument,
        patch: &StatePatch,
    ) {
        let activity = patch.activity.as_ref();
        match section {
            Section::ActivityEvents => {
                if let Some(incoming) = activity.and_then(|a| a.events.as_ref()) {
                    next.activity.events =
                        self.merge_list_with(policy, &next.activity.events, incoming);
                }
            }
            Section::ActivityTelemetry => {
                if let Some(incoming) = activity.and_then(|a| a.telemetry.as_ref()) {
                    next.activity.telemetry =
                        self.merge_list_with(policy, &next.activity.telemetry, incoming);
                }
            }
            Section::TransactionHistory => {
                if let Some(incoming) = patch.transaction_history.as_ref() {
                    next.transaction_history =
                        self.merge_list_with(policy, &next.transaction_history, incoming);
                }
            }
            _ => {}
        }
    }

    fn merge_list_with<T: Clone + PartialEq>(
        &self,
        policy: MergePolicy,
        current: &SharedList<T>,
        incoming: &SharedList<T>,
    ) -> SharedList<T> {
        match policy {
            MergePolicy::Bounded(window) => {
                bound_list(merge_list(current, incoming), self.limits.window(window))
            }
            MergePolicy::Replace => Arc::clone(incoming),
            _ => merge_list(current, incoming),
        }
    }
}

/// Reference-identical input returns `current` untouched. An incoming list
/// that starts with all of `current` is treated as a full resync; anything
/// else is a delta and gets appended.
pub fn merge_list<T: Clone + PartialEq>(
    current: &SharedList<T>,
    incoming: &SharedList<T>,
) -> SharedList<T> {
    if Arc::ptr_eq(current, incoming) || incoming.is_empty() {
        return Arc::clone(current);
    }
    if incoming.len() >= current.len() && incoming.starts_with(current) {
        return Arc::clone(incoming);
    }
    let mut joined = Vec::with_capacity(current.len() + incoming.len());
    joined.extend(current.iter().cloned());
    joined.extend(incoming.iter().cloned());
    Arc::new(joined)
}

/// Keeps the newest `limit` entries.
pub fn bound_list<T: Clone>(list: SharedList<T>, limit: usize) -> SharedList<T> {
    if list.len() <= limit {
        return list;
    }
    Arc::new(list[list.len() - limit..].to_vec())
}

fn apply_guarded(guard: Guard, next: &mut StateDocument, patch: &StatePatch) {
    match guard {
        Guard::PhaseMonotonic => {
            if let Some(transition) = patch.lifecycle {
                apply_lifecycle(next, transition);
            }
        }
        Guard::OnboardingMonotonic => match patch.onboarding {
            Some(OnboardingUpdate::Advance(proposed)) => {
                let accepted = match next.onboarding {
                    None => true,
                    Some(existing) if existing.key == proposed.key => {
                        proposed.step >= existing.step
                    }
                    Some(existing) => proposed.step > existing.step,
                };
                if accepted {
                    next.onboarding = Some(proposed);
                }
            }
            Some(OnboardingUpdate::Clear) => next.onboarding = None,
            None => {}
        },
        Guard::TaskStatusMachine => {
            if let Some(task_patch) = patch.task.as_ref() {
                apply_task(next, task_patch, resolves_wait(patch));
            }
        }
    }
}

fn apply_lifecycle(next: &mut StateDocument, transition: PhaseTransition) {
    let current = next.lifecycle.phase;
    match transition {
        PhaseTransition::NewHire => {
            next.lifecycle.phase = Phase::Onboarding;
            reset_onboarding_scope(next);
        }
        PhaseTransition::Advance(target) if target == current => {}
        PhaseTransition::Advance(target) if current.can_advance_to(target) => {
            next.lifecycle.phase = target;
            if target == Phase::Onboarding {
                reset_onboarding_scope(next);
            }
        }
        PhaseTransition::Advance(_) => {}
    }
}

fn reset_onboarding_scope(next: &mut StateDocument) {
    next.onboarding = None;
    next.onboarding_flow = None;
    next.operator_input = None;
    next.funding_token_input = None;
    next.operator_config = None;
    next.delegation_bundle = None;
    next.metrics = Metrics::default();
    next.private.pending_interrupt = None;
    next.private.last_resume_digest = None;
}

fn resolves_wait(patch: &StatePatch) -> bool {
    matches!(
        patch.private.as_ref().and_then(|p| p.pending_interrupt.as_ref()),
        Some(InterruptSlot::Resolved)
    )
}

fn apply_task(next: &mut StateDocument, patch: &TaskPatch, resolves_wait: bool) {
    let Some(existing) = next.task.as_mut() else {
        if let Some(id) = patch.id.clone() {
            next.task = Some(Task {
                id,
                status: patch
                    .status
                    .clone()
                    .unwrap_or_else(|| TaskStatus::new(TaskState::Submitted, "submitted", 0)),
            });
        }
        return;
    };

    if let Some(id) = patch.id.as_ref().filter(|id| **id != existing.id) {
        let status = patch.status.clone().unwrap_or_else(|| {
            TaskStatus::new(
                TaskState::Submitted,
                "submitted",
                existing.status.timestamp,
            )
        });
        *existing = Task {
            id: id.clone(),
            status,
        };
        return;
    }

    let Some(incoming) = patch.status.as_ref() else {
        return;
    };
    let from = existing.status.state;
    if from.is_awaiting_input() && incoming.state == TaskState::Working && !resolves_wait {
        return;
    }
    if !from.can_transition_to(incoming.state) {
        return;
    }
    existing.status = TaskStatus {
        state: incoming.state,
        message: incoming.message.clone(),
        timestamp: incoming.timestamp.max(existing.status.timestamp),
    };
}

fn apply_replace(section: Section, next: &mut StateDocument, patch: &StatePatch) {
    match section {
        Section::OperatorInput => replace(&mut next.operator_input, &patch.operator_input),
        Section::FundingTokenInput => {
            replace(&mut next.funding_token_input, &patch.funding_token_input)
        }
        Section::OperatorConfig => replace(&mut next.operator_config, &patch.operator_config),
        Section::DelegationBundle => {
            replace(&mut next.delegation_bundle, &patch.delegation_bundle)
        }
        Section::TransactionHistory => {
            if let Some(incoming) = patch.transaction_history.as_ref() {
                next.transaction_history = Arc::clone(incoming);
            }
        }
        _ => {}
    }
}

fn replace<T: Clone>(slot: &mut Option<T>, incoming: &Option<T>) {
    if let Some(value) = incoming {
        *slot = Some(value.clone());
    }
}

fn set_if<T: Clone>(slot: &mut T, incoming: &Option<T>) {
    if let Some(value) = incoming {
        *slot = value.clone();
    }
}

fn set_opt<T: Clone>(slot: &mut Option<T>, incoming: &Option<T>) {
    if incoming.is_some() {
        slot.clone_from(incoming);
    }
}

fn merge_into<T: Clone + PartialEq>(slot: &mut SharedList<T>, incoming: &Option<SharedList<T>>) {
    if let Some(incoming) = incoming {
        *slot = merge_list(slot, incoming);
    }
}

fn apply_nested(section: Section, next: &mut StateDocument, patch: &StatePatch) {
    match section {
        Section::OnboardingFlow => {
            if let Some(flow_patch) = patch.onboarding_flow.as_ref() {
                merge_onboarding_flow(next, flow_patch);
            }
        }
        Section::Profile => {
            let Some(incoming) = patch.profile.as_ref() else {
                return;
            };
            let profile = &mut next.profile;
            set_opt(&mut profile.agent_income, &incoming.agent_income);
            set_opt(&mut profile.aum, &incoming.aum);
            set_opt(&mut profile.total_users, &incoming.total_users);
            set_opt(&mut profile.apy, &incoming.apy);
            merge_into(&mut profile.chains, &incoming.chains);
            merge_into(&mut profile.protocols, &incoming.protocols);
            merge_into(&mut profile.tokens, &incoming.tokens);
            merge_into(&mut profile.resources, &incoming.resources);
        }
        Section::Metrics => {
            let Some(incoming) = patch.metrics.as_ref() else {
                return;
            };
            let metrics = &mut next.metrics;
            set_if(&mut metrics.iteration, &incoming.iteration);
            set_if(
                &mut metrics.cycles_since_rebalance,
                &incoming.cycles_since_rebalance,
            );
            set_if(&mut metrics.stale_cycles, &incoming.stale_cycles);
            set_opt(&mut metrics.last_cycle_at, &incoming.last_cycle_at);
            set_opt(&mut metrics.last_action, &incoming.last_action);
            set_opt(&mut metrics.latest_snapshot, &incoming.latest_snapshot);
        }
        Section::Private => {
            let Some(incoming) = patch.private.as_ref() else {
                return;
            };
            let private = &mut next.private;
            set_if(&mut private.bootstrapped, &incoming.bootstrapped);
            set_opt(
                &mut private.last_applied_command_mutation_id,
                &incoming.last_applied_command_mutation_id,
            );
            set_opt(
                &mut private.last_applied_sync_mutation_id,
                &incoming.last_applied_sync_mutation_id,
            );
            set_if(&mut private.cron_scheduled, &incoming.cron_scheduled);
            set_opt(&mut private.cycle_interval_ms, &incoming.cycle_interval_ms);
            set_opt(&mut private.last_resume_digest, &incoming.last_resume_digest);
            match incoming.pending_interrupt.as_ref() {
                Some(InterruptSlot::Pending(pending)) => {
                    private.pending_interrupt = Some(pending.clone())
                }
                Some(InterruptSlot::Resolved) => private.pending_interrupt = None,
                None => {}
            }
        }
        _ => {}
    }
}

fn merge_onboarding_flow(next: &mut StateDocument, patch: &OnboardingFlowPatch) {
    match next.onboarding_flow.as_mut() {
        Some(flow) => {
            set_if(&mut flow.status, &patch.status);
            set_if(&mut flow.started_at, &patch.started_at);
            merge_into(&mut flow.completed_steps, &patch.completed_steps);
            set_opt(&mut flow.completed_at, &patch.completed_at);
        }
        None => {
            next.onboarding_flow = Some(OnboardingFlow {
                status: patch.status.unwrap_or(OnboardingFlowStatus::InProgress),
                started_at: patch.started_at.unwrap_or_default(),
                completed_steps: patch.completed_steps.clone().unwrap_or_default(),
                completed_at: patch.completed_at,
            });
        }
    }
}
