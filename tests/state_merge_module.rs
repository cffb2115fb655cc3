use agentloop::shared::TaskId;
use agentloop::state::{
    merge, policy_for, ActivityEvent, ActivityKind, ActivityPatch, Guard, InterruptSlot,
    MergePolicy, Merger, Metrics, MetricsPatch, OnboardingFlowPatch, OnboardingKey,
    OnboardingPosition, OnboardingUpdate, OperatorInput, Phase, PhaseTransition, PrivatePatch,
    RetentionLimits, RetentionWindow, Section, StateDocument, StatePatch, Task, TaskPatch,
    TaskState, TaskStatus, TransactionRecord, TransactionStatus, SECTION_POLICIES,
};
use std::sync::Arc;

fn task_id(raw: &str) -> TaskId {
    TaskId::parse(raw).expect("task id")
}

fn with_task(state: TaskState, timestamp: i64) -> StateDocument {
    StateDocument {
        task: Some(Task {
            id: task_id("task-1"),
            status: TaskStatus::new(state, "seeded", timestamp),
        }),
        ..StateDocument::default()
    }
}

fn event(message: &str, timestamp: i64) -> ActivityEvent {
    ActivityEvent::new(ActivityKind::Status, message, timestamp)
}

fn record(cycle: u64) -> TransactionRecord {
    TransactionRecord {
        cycle,
        action: "rebalance".to_string(),
        tx_hash: Some(format!("0x{cycle:04x}")),
        status: TransactionStatus::Success,
        reason: None,
        timestamp: cycle as i64,
    }
}

fn operator_input() -> OperatorInput {
    OperatorInput {
        wallet_address: "0xwallet".to_string(),
        resource_id: "pool-1".to_string(),
        contribution_usd: Some(250.0),
        funding_token_address: Some("0xusdc".to_string()),
    }
}

#[test]
fn empty_patch_returns_equal_document() {
    let mut current = with_task(TaskState::Working, 10);
    current.activity.events = Arc::new(vec![event("a", 1)]);

    let merged = merge(&current, &StatePatch::default());
    assert_eq!(merged, current);
    assert!(Arc::ptr_eq(&merged.activity.events, &current.activity.events));
}

#[test]
fn shared_list_reference_is_not_duplicated() {
    let mut current = StateDocument::default();
    current.transaction_history = Arc::new(vec![record(1), record(2)]);

    let merged = merge(
        &current,
        &StatePatch {
            transaction_history: Some(Arc::clone(&current.transaction_history)),
            ..StatePatch::default()
        },
    );
    assert_eq!(merged.transaction_history.len(), 2);
}

#[test]
fn transaction_history_appends_deltas_and_accepts_resyncs() {
    let mut current = StateDocument::default();
    current.transaction_history = Arc::new(vec![record(1), record(2)]);

    let appended = merge(
        &current,
        &StatePatch {
            transaction_history: Some(Arc::new(vec![record(3)])),
            ..StatePatch::default()
        },
    );
    assert_eq!(
        appended
            .transaction_history
            .iter()
            .map(|r| r.cycle)
            .collect::<Vec<_>>(),
        vec![1, 2, 3]
    );

    let resynced = merge(
        &current,
        &StatePatch {
            transaction_history: Some(Arc::new(vec![record(1), record(2), record(3), record(4)])),
            ..StatePatch::default()
        },
    );
    assert_eq!(resynced.transaction_history.len(), 4);
}

#[test]
fn activity_lists_are_bounded_to_the_newest_entries() {
    let merger = Merger::new(RetentionLimits {
        events: 3,
        telemetry: 2,
    });
    let mut current = StateDocument::default();
    current.activity.events = Arc::new(vec![event("e1", 1), event("e2", 2)]);

    let merged = merger.merge(
        &current,
        &StatePatch {
            activity: Some(ActivityPatch {
                events: Some(Arc::new(vec![event("e3", 3), event("e4", 4)])),
                telemetry: None,
            }),
            ..StatePatch::default()
        },
    );
    assert_eq!(
        merged
            .activity
            .events
            .iter()
            .map(|e| e.message.as_str())
            .collect::<Vec<_>>(),
        vec!["e2", "e3", "e4"]
    );
}

#[test]
fn onboarding_position_never_moves_backwards() {
    let mut current = StateDocument::default();
    current.onboarding = Some(OnboardingPosition::at(OnboardingKey::FundingToken));

    let rewound = merge(
        &current,
        &StatePatch {
            onboarding: Some(OnboardingUpdate::Advance(OnboardingPosition::at(
                OnboardingKey::ResourceDiscovery,
            ))),
            ..StatePatch::default()
        },
    );
    assert_eq!(
        rewound.onboarding.map(|p| p.key),
        Some(OnboardingKey::FundingToken)
    );

    let same = merge(
        &current,
        &StatePatch {
            onboarding: Some(OnboardingUpdate::Advance(OnboardingPosition::at(
                OnboardingKey::FundingToken,
            ))),
            ..StatePatch::default()
        },
    );
    assert_eq!(same.onboarding, current.onboarding);

    let forward = merge(
        &current,
        &StatePatch {
            onboarding: Some(OnboardingUpdate::Advance(OnboardingPosition::at(
                OnboardingKey::Delegation,
            ))),
            ..StatePatch::default()
        },
    );
    assert_eq!(
        forward.onboarding.map(|p| (p.step, p.key)),
        Some((4, OnboardingKey::Delegation))
    );
}

#[test]
fn phase_only_moves_forward_outside_new_hire() {
    let mut current = StateDocument::default();
    current.lifecycle.phase = Phase::Active;

    let merged = merge(
        &current,
        &StatePatch {
            lifecycle: Some(PhaseTransition::Advance(Phase::Prehire)),
            ..StatePatch::default()
        },
    );
    assert_eq!(merged.phase(), Phase::Active);

    let fired = merge(
        &current,
        &StatePatch {
            lifecycle: Some(PhaseTransition::Advance(Phase::Fired)),
            ..StatePatch::default()
        },
    );
    assert_eq!(fired.phase(), Phase::Fired);
}

#[test]
fn new_hire_resets_onboarding_scope_and_adopts_new_task() {
    let mut current = with_task(TaskState::Completed, 50);
    current.lifecycle.phase = Phase::Active;
    current.onboarding = Some(OnboardingPosition::at(OnboardingKey::Delegation));
    current.operator_input = Some(operator_input());
    current.metrics = Metrics {
        iteration: 12,
        ..Metrics::default()
    };
    current.transaction_history = Arc::new(vec![record(1)]);

    let merged = merge(
        &current,
        &StatePatch {
            lifecycle: Some(PhaseTransition::NewHire),
            task: Some(TaskPatch {
                id: Some(task_id("task-2")),
                status: Some(TaskStatus::new(TaskState::Working, "hired", 60)),
            }),
            ..StatePatch::default()
        },
    );

    assert_eq!(merged.phase(), Phase::Onboarding);
    assert_eq!(merged.onboarding, None);
    assert_eq!(merged.onboarding_flow, None);
    assert_eq!(merged.operator_input, None);
    assert_eq!(merged.funding_token_input, None);
    assert_eq!(merged.operator_config, None);
    assert_eq!(merged.delegation_bundle, None);
    assert_eq!(merged.metrics.iteration, 0);
    assert_eq!(merged.transaction_history.len(), 1);

    let task = merged.task.expect("task");
    assert_eq!(task.id.as_str(), "task-2");
    assert_eq!(task.status.state, TaskState::Working);
}

#[test]
fn new_hire_patch_fields_land_after_the_reset() {
    let mut current = StateDocument::default();
    current.lifecycle.phase = Phase::Fired;
    current.metrics.iteration = 4;

    let merged = merge(
        &current,
        &StatePatch {
            lifecycle: Some(PhaseTransition::NewHire),
            onboarding_flow: Some(OnboardingFlowPatch {
                started_at: Some(70),
                ..OnboardingFlowPatch::default()
            }),
            metrics: Some(MetricsPatch {
                last_action: Some("hire".to_string()),
                ..MetricsPatch::default()
            }),
            ..StatePatch::default()
        },
    );
    assert_eq!(merged.phase(), Phase::Onboarding);
    assert_eq!(merged.onboarding_flow.map(|f| f.started_at), Some(70));
    assert_eq!(merged.metrics.iteration, 0);
    assert_eq!(merged.metrics.last_action.as_deref(), Some("hire"));
}

#[test]
fn stale_working_update_does_not_clear_an_open_wait() {
    let current = with_task(TaskState::InputRequired, 100);

    let merged = merge(
        &current,
        &StatePatch::task_status(TaskStatus::new(TaskState::Working, "stale", 90)),
    );
    let status = merged.task.expect("task").status;
    assert_eq!(status.state, TaskState::InputRequired);
    assert_eq!(status.timestamp, 100);
    assert_eq!(status.message.as_deref(), Some("seeded"));
}

#[test]
fn working_update_that_resolves_the_wait_is_accepted() {
    let current = with_task(TaskState::InputRequired, 100);

    let merged = merge(
        &current,
        &StatePatch::task_status(TaskStatus::new(TaskState::Working, "answered", 120)).combine(
            StatePatch::private(PrivatePatch {
                pending_interrupt: Some(InterruptSlot::Resolved),
                ..PrivatePatch::default()
            }),
        ),
    );
    let status = merged.task.expect("task").status;
    assert_eq!(status.state, TaskState::Working);
    assert_eq!(status.timestamp, 120);
}

#[test]
fn accepted_status_never_rewinds_the_timestamp() {
    let current = with_task(TaskState::Working, 200);

    let merged = merge(
        &current,
        &StatePatch::task_status(TaskStatus::new(TaskState::Completed, "done", 150)),
    );
    let status = merged.task.expect("task").status;
    assert_eq!(status.state, TaskState::Completed);
    assert_eq!(status.timestamp, 200);
}

#[test]
fn invalid_transition_keeps_the_terminal_status() {
    let current = with_task(TaskState::Completed, 10);

    let merged = merge(
        &current,
        &StatePatch::task_status(TaskStatus::new(TaskState::Working, "late", 20)),
    );
    assert_eq!(merged.task.expect("task").status.state, TaskState::Completed);
}

#[test]
fn rejected_section_does_not_block_the_rest_of_the_patch() {
    let current = with_task(TaskState::Failed, 10);

    let merged = merge(
        &current,
        &StatePatch {
            operator_input: Some(operator_input()),
            ..StatePatch::task_status(TaskStatus::new(TaskState::Working, "late", 20))
        }
        .combine(StatePatch::event(event("kept", 20))),
    );
    assert_eq!(merged.task.expect("task").status.state, TaskState::Failed);
    assert_eq!(merged.operator_input, Some(operator_input()));
    assert_eq!(merged.activity.events.len(), 1);
}

#[test]
fn new_task_id_replaces_a_finished_task() {
    let current = with_task(TaskState::Completed, 10);

    let merged = merge(
        &current,
        &StatePatch {
            task: Some(TaskPatch {
                id: Some(task_id("task-9")),
                status: Some(TaskStatus::new(TaskState::Working, "next cycle", 30)),
            }),
            ..StatePatch::default()
        },
    );
    let task = merged.task.expect("task");
    assert_eq!(task.id.as_str(), "task-9");
    assert_eq!(task.status.state, TaskState::Working);
}

#[test]
fn policy_table_covers_every_section_once() {
    assert_eq!(SECTION_POLICIES.len(), 14);
    assert_eq!(
        policy_for(Section::Lifecycle),
        MergePolicy::Guarded(Guard::PhaseMonotonic)
    );
    assert_eq!(
        policy_for(Section::ActivityEvents),
        MergePolicy::Bounded(RetentionWindow::Events)
    );
    assert_eq!(
        policy_for(Section::TransactionHistory),
        MergePolicy::AppendOrResync
    );
    assert_eq!(policy_for(Section::OperatorInput), MergePolicy::Replace);
    assert_eq!(SECTION_POLICIES[0].0, Section::Lifecycle);
}
