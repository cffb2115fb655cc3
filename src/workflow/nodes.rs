//! Built-in step bodies. Each reads the current document and returns a
//! patch for the driver to merge; none of them touch storage.

use super::interrupt::{interpret_response, interrupt_id, response_digest, ResumeDecision};
use super::onboarding::{is_step_satisfied, onboarding_satisfied};
use super::{AgentDomain, InterruptRequest, PendingInterrupt, RunContext, StepError, StepId, StepOutcome};
use crate::command::route_after_bootstrap;
use crate::shared::TaskId;
use crate::state::{
    ActivityEvent, ActivityKind, ActivityPatch, DelegationBundle, FundingTokenInput, InterruptSlot,
    MetricsPatch, OnboardingFlowPatch, OnboardingFlowStatus, OnboardingKey, OnboardingPosition,
    OnboardingUpdate, OperatorConfig, OperatorInput, Phase, PhaseTransition, PrivatePatch,
    SignedDelegation, StateDocument, StatePatch, TaskPatch, TaskState, TaskStatus,
    TelemetryEntry,
};
use serde_json::Value;
use std::sync::Arc;

pub fn run_step(
    step: StepId,
    state: &StateDocument,
    run_start: &StateDocument,
    ctx: &RunContext,
    domain: &dyn AgentDomain,
) -> StepOutcome {
    match step {
        StepId::Bootstrap => bootstrap(state, ctx, domain),
        StepId::SyncState | StepId::Park => StepOutcome::pass(),
        StepId::Hire => hire(ctx),
        StepId::DiscoverResources => discover_resources(state, ctx, domain),
        StepId::CollectOperatorInput => collect_operator_input(state, ctx, domain),
        StepId::CollectFundingToken => collect_funding_token(state, ctx, domain),
        StepId::CollectDelegations => collect_delegations(state, ctx, domain),
        StepId::PrepareOperator => prepare_operator(state, ctx, domain),
        StepId::RunCycle => run_cycle(state, ctx, domain),
        StepId::Fire => fire(state, ctx),
        StepId::Summarize => summarize(run_start, state, ctx),
    }
}

/// Status update that opens a fresh task when there is none or the
/// current one already finished.
pub fn status_patch(state: &StateDocument, next: TaskState, message: &str, now: i64) -> StatePatch {
    let status = TaskStatus::new(next, message, now);
    match state.task.as_ref() {
        Some(task) if task.status.state.is_active() => StatePatch::task_status(status),
        _ => StatePatch {
            task: Some(TaskPatch {
                id: Some(TaskId::generate(now)),
                status: Some(status),
            }),
            ..StatePatch::default()
        },
    }
}

/// Everything the driver merges when a step suspends: the wait itself,
/// the task flip to `input-required` and an activity entry.
pub fn suspension_patch(
    state: &StateDocument,
    step: StepId,
    request: InterruptRequest,
    now: i64,
) -> (StatePatch, PendingInterrupt) {
    let status = status_patch(state, TaskState::InputRequired, &request.message, now);
    let task_id = status
        .task
        .as_ref()
        .and_then(|task| task.id.clone())
        .or_else(|| state.task.as_ref().map(|task| task.id.clone()));
    let pending = PendingInterrupt {
        id: interrupt_id(request.kind, task_id.as_ref(), now),
        step,
        task_id,
        issued_at: now,
        request,
    };
    let mut event = ActivityEvent::new(ActivityKind::Interrupt, pending.request.message.clone(), now);
    event.data = serde_json::to_value(&pending.request).ok();
    let patch = status
        .combine(StatePatch::private(PrivatePatch {
            pending_interrupt: Some(InterruptSlot::Pending(pending.clone())),
            ..PrivatePatch::default()
        }))
        .combine(StatePatch::event(event));
    (patch, pending)
}

/// Fails the task and jumps to `summarize`.
pub fn failure_patch(state: &StateDocument, error: &StepError, now: i64) -> StatePatch {
    let message = error.to_string();
    status_patch(state, TaskState::Failed, &message, now)
        .combine(StatePatch::event(ActivityEvent::new(ActivityKind::Status, message, now)))
}

fn fail(state: &StateDocument, ctx: &RunContext, error: StepError) -> StepOutcome {
    StepOutcome::Goto {
        patch: failure_patch(state, &error, ctx.now),
        next: StepId::Summarize,
    }
}

fn fail_resume(
    state: &StateDocument,
    ctx: &RunContext,
    response: &Value,
    error: StepError,
) -> StepOutcome {
    StepOutcome::Goto {
        patch: resolved(response).combine(failure_patch(state, &error, ctx.now)),
        next: StepId::Summarize,
    }
}

fn resolved(response: &Value) -> StatePatch {
    StatePatch::private(PrivatePatch {
        pending_interrupt: Some(InterruptSlot::Resolved),
        last_resume_digest: Some(response_digest(response)),
        ..PrivatePatch::default()
    })
}

fn position(key: OnboardingKey) -> StatePatch {
    StatePatch {
        onboarding: Some(OnboardingUpdate::Advance(OnboardingPosition::at(key))),
        ..StatePatch::default()
    }
}

fn completed(key: OnboardingKey) -> StatePatch {
    StatePatch {
        onboarding_flow: Some(OnboardingFlowPatch {
            completed_steps: Some(Arc::new(vec![key])),
            ..OnboardingFlowPatch::default()
        }),
        ..StatePatch::default()
    }
}

fn note(kind: ActivityKind, message: impl Into<String>, now: i64) -> StatePatch {
    StatePatch::event(ActivityEvent::new(kind, message, now))
}

/// The pending wait and its answer, when this run resumes `step`.
fn pending_answer<'a>(
    step: StepId,
    state: &'a StateDocument,
    ctx: &'a RunContext,
) -> Option<(&'a PendingInterrupt, &'a Value)> {
    let pending = state.private.pending_interrupt.as_ref()?;
    if pending.step != step {
        return None;
    }
    ctx.resume.as_ref().map(|response| (pending, response))
}

fn consume_answer(
    state: &StateDocument,
    ctx: &RunContext,
    pending: &PendingInterrupt,
    response: &Value,
) -> Result<Value, StepOutcome> {
    match interpret_response(&pending.request, response) {
        Ok(ResumeDecision::Accepted(value)) => Ok(value),
        Ok(ResumeDecision::Declined(reason)) => Err(fail_resume(
            state,
            ctx,
            response,
            StepError::Rejected(reason),
        )),
        Err(err) => Err(fail_resume(state, ctx, response, err)),
    }
}

fn suspend_or_fail(
    state: &StateDocument,
    ctx: &RunContext,
    key: OnboardingKey,
    request: Result<InterruptRequest, StepError>,
) -> StepOutcome {
    match request {
        Ok(request) => StepOutcome::Suspend {
            patch: position(key),
            request,
        },
        Err(err) => fail(state, ctx, err),
    }
}

fn bootstrap(state: &StateDocument, ctx: &RunContext, domain: &dyn AgentDomain) -> StepOutcome {
    let next = route_after_bootstrap(ctx.command, state, ctx.settings.bypass_delegation_signing);
    if state.private.bootstrapped {
        return StepOutcome::Goto {
            patch: StatePatch::default(),
            next,
        };
    }
    match domain.bootstrap(state, ctx) {
        Ok(patch) => StepOutcome::Goto {
            patch: patch.combine(StatePatch::private(PrivatePatch {
                bootstrapped: Some(true),
                ..PrivatePatch::default()
            })),
            next,
        },
        Err(err) => fail(state, ctx, err),
    }
}

fn hire(ctx: &RunContext) -> StepOutcome {
    let now = ctx.now;
    StepOutcome::Continue(
        StatePatch {
            lifecycle: Some(PhaseTransition::NewHire),
            task: Some(TaskPatch {
                id: Some(TaskId::generate(now)),
                status: Some(TaskStatus::new(
                    TaskState::Working,
                    "hired; onboarding started",
                    now,
                )),
            }),
            onboarding_flow: Some(OnboardingFlowPatch {
                status: Some(OnboardingFlowStatus::InProgress),
                started_at: Some(now),
                ..OnboardingFlowPatch::default()
            }),
            private: Some(PrivatePatch {
                cron_scheduled: Some(false),
                ..PrivatePatch::default()
            }),
            ..StatePatch::default()
        }
        .combine(note(ActivityKind::Command, "hire accepted", now)),
    )
}

fn discover_resources(
    state: &StateDocument,
    ctx: &RunContext,
    domain: &dyn AgentDomain,
) -> StepOutcome {
    if is_step_satisfied(StepId::DiscoverResources, state, ctx.settings.bypass_delegation_signing) {
        return StepOutcome::pass();
    }
    let patch = match domain.discover_resources(state, ctx) {
        Ok(patch) => patch,
        Err(err) => return fail(state, ctx, err),
    };
    let found = patch
        .profile
        .as_ref()
        .and_then(|profile| profile.resources.as_ref())
        .map_or(0, |resources| resources.len());
    if found == 0 {
        return fail(
            state,
            ctx,
            StepError::Execution("resource discovery returned no resources".to_string()),
        );
    }
    StepOutcome::Continue(
        patch
            .combine(position(OnboardingKey::ResourceDiscovery))
            .combine(completed(OnboardingKey::ResourceDiscovery))
            .combine(note(
                ActivityKind::Artifact,
                format!("discovered {found} resource(s)"),
                ctx.now,
            )),
    )
}

fn collect_operator_input(
    state: &StateDocument,
    ctx: &RunContext,
    domain: &dyn AgentDomain,
) -> StepOutcome {
    let step = StepId::CollectOperatorInput;
    if is_step_satisfied(step, state, ctx.settings.bypass_delegation_signing) {
        return StepOutcome::pass();
    }
    let Some((pending, response)) = pending_answer(step, state, ctx) else {
        return suspend_or_fail(
            state,
            ctx,
            OnboardingKey::OperatorConfiguration,
            domain.operator_input_request(state, ctx),
        );
    };
    let value = match consume_answer(state, ctx, pending, response) {
        Ok(value) => value,
        Err(outcome) => return outcome,
    };
    let input: OperatorInput = match serde_json::from_value(value) {
        Ok(input) => input,
        Err(err) => return fail_resume(state, ctx, response, StepError::Validation(err.to_string())),
    };
    if !state.profile.resources.is_empty()
        && !state
            .profile
            .resources
            .iter()
            .any(|resource| resource.id == input.resource_id)
    {
        return fail_resume(
            state,
            ctx,
            response,
            StepError::Validation(format!("unknown resource `{}`", input.resource_id)),
        );
    }

    StepOutcome::Continue(
        resolved(response)
            .combine(StatePatch {
                operator_input: Some(input),
                ..StatePatch::default()
            })
            .combine(completed(OnboardingKey::OperatorConfiguration))
            .combine(status_patch(
                state,
                TaskState::Working,
                "operator input received",
                ctx.now,
            )),
    )
}

fn collect_funding_token(
    state: &StateDocument,
    ctx: &RunContext,
    domain: &dyn AgentDomain,
) -> StepOutcome {
    let step = StepId::CollectFundingToken;
    if is_step_satisfied(step, state, ctx.settings.bypass_delegation_signing) {
        return StepOutcome::pass();
    }
    let Some((pending, response)) = pending_answer(step, state, ctx) else {
        return suspend_or_fail(
            state,
            ctx,
            OnboardingKey::FundingToken,
            domain.funding_token_request(state, ctx),
        );
    };
    let value = match consume_answer(state, ctx, pending, response) {
        Ok(value) => value,
        Err(outcome) => return outcome,
    };
    let input: FundingTokenInput = match serde_json::from_value(value) {
        Ok(input) => input,
        Err(err) => return fail_resume(state, ctx, response, StepError::Validation(err.to_string())),
    };

    StepOutcome::Continue(
        resolved(response)
            .combine(StatePatch {
                funding_token_input: Some(input),
                ..StatePatch::default()
            })
            .combine(completed(OnboardingKey::FundingToken))
            .combine(status_patch(
                state,
                TaskState::Working,
                "funding token selected",
                ctx.now,
            )),
    )
}

fn collect_delegations(
    state: &StateDocument,
    ctx: &RunContext,
    domain: &dyn AgentDomain,
) -> StepOutcome {
    let step = StepId::CollectDelegations;
    if state.has_signed_delegation() {
        return StepOutcome::pass();
    }
    if ctx.settings.bypass_delegation_signing {
        return StepOutcome::Continue(
            completed(OnboardingKey::Delegation).combine(note(
                ActivityKind::Status,
                "delegation signing bypassed",
                ctx.now,
            )),
        );
    }
    let Some((pending, response)) = pending_answer(step, state, ctx) else {
        let request = domain.delegation_request(state, ctx).and_then(|request| {
            let unsigned = request
                .payload
                .get("delegationsToSign")
                .and_then(Value::as_array)
                .map_or(0, Vec::len);
            if unsigned == 1 {
                Ok(request)
            } else {
                Err(StepError::Execution(format!(
                    "delegation request must carry exactly one unsigned delegation, got {unsigned}"
                )))
            }
        });
        return suspend_or_fail(state, ctx, OnboardingKey::Delegation, request);
    };
    let value = match consume_answer(state, ctx, pending, response) {
        Ok(value) => value,
        Err(outcome) => return outcome,
    };
    let bundle = match signed_bundle(&pending.request.payload, &value) {
        Ok(bundle) => bundle,
        Err(err) => return fail_resume(state, ctx, response, err),
    };

    StepOutcome::Continue(
        resolved(response)
            .combine(StatePatch {
                delegation_bundle: Some(bundle),
                ..StatePatch::default()
            })
            .combine(completed(OnboardingKey::Delegation))
            .combine(status_patch(
                state,
                TaskState::Working,
                "delegation signed",
                ctx.now,
            )),
    )
}

fn signed_bundle(payload: &Value, response: &Value) -> Result<DelegationBundle, StepError> {
    let signed = response
        .get("signedDelegations")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    if signed.len() != 1 {
        return Err(StepError::Validation(format!(
            "expected exactly one signed delegation, received {}",
            signed.len()
        )));
    }
    let delegation: SignedDelegation = signed
        .into_iter()
        .next()
        .map(serde_json::from_value)
        .transpose()
        .map_err(|err| StepError::Validation(err.to_string()))?
        .ok_or_else(|| StepError::Validation("signed delegation missing".to_string()))?;

    let field = |name: &str| {
        payload
            .get(name)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| StepError::Execution(format!("delegation request payload lacks `{name}`")))
    };
    let delegator_address = field("delegatorAddress")?;
    let delegatee_address = field("delegateeAddress")?;
    let chain_id = payload
        .get("chainId")
        .and_then(Value::as_u64)
        .ok_or_else(|| StepError::Execution("delegation request payload lacks `chainId`".to_string()))?;
    if !delegation.delegate.eq_ignore_ascii_case(&delegatee_address) {
        return Err(StepError::Validation(format!(
            "signed delegation names delegate `{}`, expected `{delegatee_address}`",
            delegation.delegate
        )));
    }
    if !delegation.delegator.eq_ignore_ascii_case(&delegator_address) {
        return Err(StepError::Validation(format!(
            "signed delegation names delegator `{}`, expected `{delegator_address}`",
            delegation.delegator
        )));
    }
    let descriptions = payload
        .get("descriptions")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Ok(DelegationBundle {
        chain_id,
        delegator_address,
        delegatee_address,
        delegations: vec![delegation],
        descriptions,
    })
}

fn prepare_operator(
    state: &StateDocument,
    ctx: &RunContext,
    domain: &dyn AgentDomain,
) -> StepOutcome {
    if is_step_satisfied(StepId::PrepareOperator, state, ctx.settings.bypass_delegation_signing) {
        return StepOutcome::pass();
    }
    let (Some(input), Some(funding_token)) =
        (state.operator_input.as_ref(), state.funding_token_address())
    else {
        return fail(
            state,
            ctx,
            StepError::Execution("operator inputs are incomplete".to_string()),
        );
    };
    let domain_patch = match domain.prepare_execution(state, ctx) {
        Ok(patch) => patch,
        Err(err) => return fail(state, ctx, err),
    };

    let interval = ctx.settings.cycle_interval(state.private.cycle_interval_ms);
    let config = OperatorConfig {
        wallet_address: input.wallet_address.clone(),
        resource_id: input.resource_id.clone(),
        funding_token_address: funding_token.to_string(),
        contribution_usd: input.contribution_usd,
        delegatee_address: state
            .delegation_bundle
            .as_ref()
            .map(|bundle| bundle.delegatee_address.clone()),
        cycle_interval_ms: interval,
    };
    let now = ctx.now;

    StepOutcome::Continue(
        domain_patch
            .combine(StatePatch {
                lifecycle: Some(PhaseTransition::Advance(Phase::Active)),
                onboarding: Some(OnboardingUpdate::Clear),
                onboarding_flow: Some(OnboardingFlowPatch {
                    status: Some(OnboardingFlowStatus::Completed),
                    completed_steps: Some(Arc::new(vec![OnboardingKey::ExecutionPreparation])),
                    completed_at: Some(now),
                    ..OnboardingFlowPatch::default()
                }),
                operator_config: Some(config),
                private: Some(PrivatePatch {
                    cron_scheduled: Some(true),
                    cycle_interval_ms: Some(interval),
                    ..PrivatePatch::default()
                }),
                ..StatePatch::default()
            })
            .combine(status_patch(
                state,
                TaskState::Completed,
                "onboarding complete",
                now,
            ))
            .combine(note(
                ActivityKind::Status,
                format!("cycles scheduled every {interval}ms"),
                now,
            )),
    )
}

fn run_cycle(state: &StateDocument, ctx: &RunContext, domain: &dyn AgentDomain) -> StepOutcome {
    if !onboarding_satisfied(state, ctx.settings.bypass_delegation_signing) {
        return StepOutcome::Goto {
            patch: StatePatch::default(),
            next: StepId::Park,
        };
    }
    let now = ctx.now;
    let iteration = state.metrics.iteration + 1;
    let opening = status_patch(
        state,
        TaskState::Working,
        &format!("cycle {iteration} running"),
        now,
    )
    .combine(StatePatch {
        metrics: Some(MetricsPatch {
            iteration: Some(iteration),
            last_cycle_at: Some(now),
            ..MetricsPatch::default()
        }),
        ..StatePatch::default()
    });

    match domain.run_cycle(state, ctx) {
        Ok(domain_patch) => {
            let sets_status = domain_patch
                .task
                .as_ref()
                .is_some_and(|task| task.status.is_some());
            let mut patch = opening.combine(domain_patch);
            if !sets_status {
                patch = patch.combine(StatePatch::task_status(TaskStatus::new(
                    TaskState::Completed,
                    format!("cycle {iteration} complete"),
                    now,
                )));
            }
            StepOutcome::Continue(patch)
        }
        Err(err) => {
            let message = err.to_string();
            let telemetry = TelemetryEntry {
                cycle: iteration,
                action: "cycle-failed".to_string(),
                reason: Some(message.clone()),
                timestamp: now,
                data: None,
            };
            StepOutcome::Goto {
                patch: opening
                    .combine(StatePatch::task_status(TaskStatus::new(
                        TaskState::Failed,
                        message.clone(),
                        now,
                    )))
                    .combine(StatePatch {
                        activity: Some(ActivityPatch {
                            events: Some(Arc::new(vec![ActivityEvent::new(
                                ActivityKind::Status,
                                message,
                                now,
                            )])),
                            telemetry: Some(Arc::new(vec![telemetry])),
                        }),
                        ..StatePatch::default()
                    }),
                next: StepId::Summarize,
            }
        }
    }
}

fn fire(state: &StateDocument, ctx: &RunContext) -> StepOutcome {
    let now = ctx.now;
    let mut patch = StatePatch {
        lifecycle: Some(PhaseTransition::Advance(Phase::Fired)),
        onboarding: Some(OnboardingUpdate::Clear),
        private: Some(PrivatePatch {
            cron_scheduled: Some(false),
            pending_interrupt: Some(InterruptSlot::Resolved),
            ..PrivatePatch::default()
        }),
        ..StatePatch::default()
    };
    if state
        .task
        .as_ref()
        .is_some_and(|task| task.status.state.is_active())
    {
        patch = patch.combine(StatePatch::task_status(TaskStatus::new(
            TaskState::Canceled,
            "agent fired",
            now,
        )));
    }
    StepOutcome::Continue(patch.combine(note(ActivityKind::Command, "fire accepted", now)))
}

fn summarize(run_start: &StateDocument, state: &StateDocument, ctx: &RunContext) -> StepOutcome {
    let before = run_start.task.as_ref();
    let Some(task) = state.task.as_ref() else {
        return StepOutcome::pass();
    };
    if before == Some(task) {
        return StepOutcome::pass();
    }
    let message = match task.status.message.as_deref() {
        Some(message) => format!("task {} {}: {message}", task.id, task.status.state),
        None => format!("task {} {}", task.id, task.status.state),
    };
    StepOutcome::Continue(note(ActivityKind::Status, message, ctx.now))
}
