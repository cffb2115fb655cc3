use super::{Command, Inbound};
use crate::state::{Phase, PrivatePatch, StateDocument};
use crate::workflow::interrupt::response_digest;
use crate::workflow::onboarding::{next_onboarding_step, onboarding_satisfied};
use crate::workflow::StepId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoOpReason {
    /// Same non-empty client mutation id as the last applied command.
    DuplicateCommand,
    /// Same response as the last applied resume, with nothing waiting.
    DuplicateResume,
    /// A resume arrived but nothing is waiting for one.
    NoPendingInterrupt,
    /// A raw run without a resume while a wait is open.
    AwaitingInterruptResponse,
}

impl NoOpReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DuplicateCommand => "duplicate-command",
            Self::DuplicateResume => "duplicate-resume",
            Self::NoPendingInterrupt => "no-pending-interrupt",
            Self::AwaitingInterruptResponse => "awaiting-interrupt-response",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteTarget {
    Step(StepId),
    NoOp(NoOpReason),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub target: RouteTarget,
    /// Bookkeeping to merge before the first step runs. Empty for no-ops.
    pub side_effects: PrivatePatch,
}

impl Resolution {
    fn noop(reason: NoOpReason) -> Self {
        Self {
            target: RouteTarget::NoOp(reason),
            side_effects: PrivatePatch::default(),
        }
    }
}

/// Maps an inbound instruction onto the step the run starts at.
///
/// `sync` is never deduplicated. Every other instruction carrying the same
/// non-empty client mutation id as the last applied one is a no-op.
pub fn resolve(state: &StateDocument, inbound: &Inbound, bypass_delegation: bool) -> Resolution {
    let envelope = &inbound.envelope;
    let token = envelope.client_mutation_id.clone();

    if envelope.command == Some(Command::Sync) {
        return Resolution {
            target: RouteTarget::Step(StepId::SyncState),
            side_effects: PrivatePatch {
                last_applied_sync_mutation_id: token,
                ..PrivatePatch::default()
            },
        };
    }

    if token.is_some() && token == state.private.last_applied_command_mutation_id {
        return Resolution::noop(NoOpReason::DuplicateCommand);
    }
    let side_effects = PrivatePatch {
        last_applied_command_mutation_id: token,
        ..PrivatePatch::default()
    };

    let target = match envelope.command {
        Some(Command::Cycle) if !state.private.bootstrapped => RouteTarget::Step(StepId::Bootstrap),
        Some(Command::Cycle) => RouteTarget::Step(cycle_target(state, bypass_delegation)),
        Some(Command::Hire) => RouteTarget::Step(StepId::Bootstrap),
        Some(Command::Fire) => RouteTarget::Step(StepId::Fire),
        Some(Command::Sync) => RouteTarget::Step(StepId::SyncState),
        None => raw_run_target(state, inbound, bypass_delegation),
    };
    match target {
        RouteTarget::NoOp(reason) => Resolution::noop(reason),
        RouteTarget::Step(_) => Resolution {
            target,
            side_effects,
        },
    }
}

/// Where `bootstrap` hands over once the thread is initialised.
pub fn route_after_bootstrap(
    command: Option<Command>,
    state: &StateDocument,
    bypass_delegation: bool,
) -> StepId {
    match command {
        Some(Command::Hire) => StepId::Hire,
        Some(Command::Cycle) => cycle_target(state, bypass_delegation),
        Some(Command::Fire) => StepId::Fire,
        Some(Command::Sync) => StepId::SyncState,
        None => continuation(state, bypass_delegation),
    }
}

fn cycle_target(state: &StateDocument, bypass_delegation: bool) -> StepId {
    if onboarding_satisfied(state, bypass_delegation) {
        StepId::RunCycle
    } else {
        StepId::Park
    }
}

fn raw_run_target(state: &StateDocument, inbound: &Inbound, bypass_delegation: bool) -> RouteTarget {
    let pending = state.private.pending_interrupt.as_ref();
    match (&inbound.resume, pending) {
        (Some(_), Some(pending)) => RouteTarget::Step(pending.step),
        (Some(response), None) => {
            let digest = response_digest(response);
            if state.private.last_resume_digest.as_deref() == Some(digest.as_str()) {
                RouteTarget::NoOp(NoOpReason::DuplicateResume)
            } else {
                RouteTarget::NoOp(NoOpReason::NoPendingInterrupt)
            }
        }
        (None, Some(_)) => RouteTarget::NoOp(NoOpReason::AwaitingInterruptResponse),
        (None, None) => RouteTarget::Step(continuation(state, bypass_delegation)),
    }
}

fn continuation(state: &StateDocument, bypass_delegation: bool) -> StepId {
    if state.phase() != Phase::Onboarding {
        return StepId::Park;
    }
    next_onboarding_step(state, bypass_delegation).unwrap_or(StepId::Park)
}
