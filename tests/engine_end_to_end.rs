use agentloop::checkpoint::{
    Checkpoint, CheckpointReason, CheckpointStore, FileCheckpointStore, MemoryCheckpointStore,
};
use agentloop::command::{Command, NoOpReason};
use agentloop::config::{CheckpointBackend, Settings};
use agentloop::engine::{Engine, EngineError, EngineOptions, RunOutcome, RunReport};
use agentloop::runtime::TickOutcome;
use agentloop::shared::{TaskId, ThreadId};
use agentloop::state::{
    ActivityPatch, MetricsPatch, OperatorInput, Phase, ProfilePatch, Resource, StateDocument,
    StatePatch, TaskState, TelemetryEntry,
};
use agentloop::workflow::{
    AgentDomain, InterruptRequest, RunContext, StepError, StepId, WorkflowSettings,
};
use std::fs;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::tempdir;

type Gate = (mpsc::Sender<()>, mpsc::Receiver<()>);

/// Discovery hands back the operator's choices up front, so a hire with
/// delegation signing bypassed reaches `active` in a single run.
#[derive(Default)]
struct PreconfiguredDomain {
    fail_next_cycle: AtomicBool,
    cycles: AtomicUsize,
    gate: Mutex<Option<Gate>>,
}

impl AgentDomain for PreconfiguredDomain {
    fn discover_resources(
        &self,
        _state: &StateDocument,
        _ctx: &RunContext,
    ) -> Result<StatePatch, StepError> {
        Ok(StatePatch {
            profile: Some(ProfilePatch {
                resources: Some(Arc::new(vec![Resource {
                    id: "pool-1".to_string(),
                    name: "Pool One".to_string(),
                    chain_id: Some(42161),
                    data: None,
                }])),
                ..ProfilePatch::default()
            }),
            operator_input: Some(OperatorInput {
                wallet_address: "0xwallet".to_string(),
                resource_id: "pool-1".to_string(),
                contribution_usd: Some(500.0),
                funding_token_address: Some("0xusdc".to_string()),
            }),
            ..StatePatch::default()
        })
    }

    fn delegation_request(
        &self,
        _state: &StateDocument,
        _ctx: &RunContext,
    ) -> Result<InterruptRequest, StepError> {
        Err(StepError::Execution(
            "delegation signing is bypassed in these tests".to_string(),
        ))
    }

    fn run_cycle(&self, state: &StateDocument, ctx: &RunContext) -> Result<StatePatch, StepError> {
        self.cycles.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().expect("gate lock").take();
        if let Some((entered, release)) = gate {
            entered.send(()).expect("signal entry");
            release.recv().expect("wait for release");
        }
        if self.fail_next_cycle.swap(false, Ordering::SeqCst) {
            return Err(StepError::Execution("quote source unavailable".to_string()));
        }
        Ok(StatePatch {
            metrics: Some(MetricsPatch {
                last_action: Some("hold".to_string()),
                ..MetricsPatch::default()
            }),
            activity: Some(ActivityPatch {
                events: None,
                telemetry: Some(Arc::new(vec![TelemetryEntry {
                    cycle: state.metrics.iteration + 1,
                    action: "hold".to_string(),
                    reason: None,
                    timestamp: ctx.now,
                    data: None,
                }])),
            }),
            ..StatePatch::default()
        })
    }
}

fn bypassing() -> WorkflowSettings {
    WorkflowSettings {
        bypass_delegation_signing: true,
        ..WorkflowSettings::default()
    }
}

fn manual_options() -> EngineOptions {
    EngineOptions {
        workflow: bypassing(),
        timers: false,
        ..EngineOptions::default()
    }
}

fn thread_id() -> ThreadId {
    ThreadId::parse("agent-1").expect("thread id")
}

fn task_id(report: &RunReport) -> TaskId {
    report.state.task.as_ref().map(|task| task.id.clone()).expect("task")
}

fn task_state(report: &RunReport) -> TaskState {
    report
        .state
        .task
        .as_ref()
        .map(|task| task.status.state)
        .expect("task")
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

fn retry_while_busy(
    mut run: impl FnMut() -> Result<RunReport, EngineError>,
) -> Result<RunReport, EngineError> {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        match run() {
            Err(err) if err.is_retryable() && Instant::now() < deadline => {
                thread::sleep(Duration::from_millis(5));
            }
            other => return other,
        }
    }
}

#[test]
fn hire_cycles_and_fire_with_one_checkpoint_per_run() {
    let dir = tempdir().expect("tempdir");
    let store = Arc::new(FileCheckpointStore::new(dir.path().join("checkpoints")));
    let domain = Arc::new(PreconfiguredDomain::default());
    let engine = Engine::new(store.clone(), domain.clone(), manual_options());
    let thread_id = thread_id();

    assert_eq!(engine.status(&thread_id).expect("status").phase, Phase::Prehire);

    let hired = engine
        .command(&thread_id, Command::Hire, Some("hire-1"))
        .expect("hire");
    assert_eq!(
        hired.visited,
        vec![
            StepId::Bootstrap,
            StepId::Hire,
            StepId::DiscoverResources,
            StepId::CollectOperatorInput,
            StepId::CollectFundingToken,
            StepId::CollectDelegations,
            StepId::PrepareOperator,
            StepId::Summarize
        ]
    );
    assert_eq!(hired.state.phase(), Phase::Active);
    assert_eq!(hired.checkpoint_seq, Some(1));
    assert_eq!(store.retained(&thread_id).expect("retained"), 1);
    assert!(engine.scheduler().is_armed(&thread_id));
    assert_eq!(engine.scheduler().interval_for(&thread_id), Some(30_000));

    let mut previous_task = task_id(&hired);
    for round in 1..=3u64 {
        let token = format!("cycle-{round}");
        let report = engine
            .command(&thread_id, Command::Cycle, Some(token.as_str()))
            .expect("cycle");
        assert_eq!(report.visited, vec![StepId::RunCycle, StepId::Summarize]);
        assert_eq!(report.checkpoint_seq, Some(1 + round));
        assert_eq!(report.state.metrics.iteration, round);
        assert_eq!(task_state(&report), TaskState::Completed);
        assert_ne!(task_id(&report), previous_task);
        previous_task = task_id(&report);
        assert_eq!(store.retained(&thread_id).expect("retained"), 1);
    }
    assert_eq!(domain.cycles.load(Ordering::SeqCst), 3);

    let fired = engine
        .command(&thread_id, Command::Fire, Some("fire-1"))
        .expect("fire");
    assert_eq!(fired.state.phase(), Phase::Fired);
    assert_eq!(fired.checkpoint_seq, Some(5));
    assert!(!fired.state.private.cron_scheduled);
    assert!(!engine.scheduler().is_armed(&thread_id));

    let after_fire = engine
        .command(&thread_id, Command::Cycle, Some("cycle-4"))
        .expect("cycle after fire");
    assert_eq!(after_fire.visited, vec![StepId::Park, StepId::Summarize]);
    assert_eq!(after_fire.state.metrics.iteration, 3);
    assert_eq!(domain.cycles.load(Ordering::SeqCst), 3);
    assert!(!engine.scheduler().is_armed(&thread_id));
    assert_eq!(store.retained(&thread_id).expect("retained"), 1);
}

#[test]
fn cycle_before_hire_parks() {
    let engine = Engine::new(
        Arc::new(MemoryCheckpointStore::new()),
        Arc::new(PreconfiguredDomain::default()),
        manual_options(),
    );
    let report = engine
        .command(&thread_id(), Command::Cycle, None)
        .expect("cycle");
    assert_eq!(
        report.visited,
        vec![StepId::Bootstrap, StepId::Park, StepId::Summarize]
    );
    assert_eq!(report.state.phase(), Phase::Prehire);
    assert!(report.state.private.bootstrapped);
    assert!(!engine.scheduler().is_armed(&thread_id()));
}

#[test]
fn repeated_command_id_writes_nothing() {
    let engine = Engine::new(
        Arc::new(MemoryCheckpointStore::new()),
        Arc::new(PreconfiguredDomain::default()),
        manual_options(),
    );
    let thread_id = thread_id();
    engine
        .command(&thread_id, Command::Hire, Some("hire-1"))
        .expect("hire");
    let first = engine
        .command(&thread_id, Command::Cycle, Some("cycle-1"))
        .expect("cycle");

    let replay = engine
        .command(&thread_id, Command::Cycle, Some("cycle-1"))
        .expect("replayed cycle");
    assert_eq!(
        replay.outcome,
        RunOutcome::Skipped(NoOpReason::DuplicateCommand)
    );
    assert_eq!(replay.checkpoint_seq, None);
    assert_eq!(replay.state, first.state);
    assert_eq!(
        engine
            .checkpoint(&thread_id)
            .expect("get")
            .map(|checkpoint| checkpoint.run_seq),
        Some(2)
    );
}

#[test]
fn sync_runs_every_time() {
    let engine = Engine::new(
        Arc::new(MemoryCheckpointStore::new()),
        Arc::new(PreconfiguredDomain::default()),
        manual_options(),
    );
    let thread_id = thread_id();
    let first = engine
        .command(&thread_id, Command::Sync, Some("sync-1"))
        .expect("sync");
    let second = engine
        .command(&thread_id, Command::Sync, Some("sync-1"))
        .expect("sync again");

    assert_eq!(first.visited, vec![StepId::SyncState, StepId::Summarize]);
    assert_eq!(second.checkpoint_seq, Some(2));
    assert_eq!(
        second.state.private.last_applied_sync_mutation_id.as_deref(),
        Some("sync-1")
    );
}

#[test]
fn concurrent_run_on_the_same_thread_is_rejected() {
    let domain = Arc::new(PreconfiguredDomain::default());
    let engine = Engine::new(
        Arc::new(MemoryCheckpointStore::new()),
        domain.clone(),
        manual_options(),
    );
    let thread_id = thread_id();
    engine
        .command(&thread_id, Command::Hire, None)
        .expect("hire");

    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    *domain.gate.lock().expect("gate lock") = Some((entered_tx, release_rx));

    let background = {
        let engine = Arc::clone(&engine);
        let thread_id = thread_id.clone();
        thread::spawn(move || engine.command(&thread_id, Command::Cycle, None))
    };
    entered_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("cycle started");

    let err = engine
        .command(&thread_id, Command::Cycle, None)
        .expect_err("second run must be rejected");
    assert!(matches!(err, EngineError::ThreadBusy { .. }));
    assert!(err.is_retryable());
    assert_eq!(engine.tick(&thread_id), TickOutcome::SkippedBusy);
    assert!(engine.status(&thread_id).expect("status").busy);

    let other = ThreadId::parse("agent-2").expect("thread id");
    engine
        .command(&other, Command::Sync, None)
        .expect("other threads are independent");

    release_tx.send(()).expect("release");
    let finished = background
        .join()
        .expect("join")
        .expect("background cycle");
    assert_eq!(finished.state.metrics.iteration, 1);

    assert_eq!(engine.tick(&thread_id), TickOutcome::Triggered);
    let state = engine.state(&thread_id).expect("get").expect("stored");
    assert_eq!(state.metrics.iteration, 2);
    assert_eq!(domain.cycles.load(Ordering::SeqCst), 2);
}

#[test]
fn collaborator_error_fails_only_that_cycle() {
    let domain = Arc::new(PreconfiguredDomain::default());
    let engine = Engine::new(
        Arc::new(MemoryCheckpointStore::new()),
        domain.clone(),
        manual_options(),
    );
    let thread_id = thread_id();
    engine
        .command(&thread_id, Command::Hire, None)
        .expect("hire");

    domain.fail_next_cycle.store(true, Ordering::SeqCst);
    let failed = engine
        .command(&thread_id, Command::Cycle, None)
        .expect("failed cycle still completes the run");
    assert_eq!(task_state(&failed), TaskState::Failed);
    assert!(failed
        .state
        .task
        .as_ref()
        .and_then(|task| task.status.message.as_deref())
        .is_some_and(|message| message.contains("quote source unavailable")));
    assert_eq!(
        failed
            .state
            .activity
            .telemetry
            .last()
            .map(|entry| entry.action.as_str()),
        Some("cycle-failed")
    );
    assert_eq!(failed.state.phase(), Phase::Active);
    assert!(engine.scheduler().is_armed(&thread_id));

    let recovered = engine
        .command(&thread_id, Command::Cycle, None)
        .expect("next cycle");
    assert_eq!(task_state(&recovered), TaskState::Completed);
    assert_ne!(task_id(&recovered), task_id(&failed));
    assert_eq!(recovered.state.metrics.iteration, 2);
    assert_eq!(recovered.state.metrics.last_action.as_deref(), Some("hold"));
}

#[test]
fn restart_resumes_from_the_last_checkpoint_and_rearms() {
    let dir = tempdir().expect("tempdir");
    let root = dir.path().join("checkpoints");
    let thread_id = thread_id();
    {
        let engine = Engine::new(
            Arc::new(FileCheckpointStore::new(&root)),
            Arc::new(PreconfiguredDomain::default()),
            manual_options(),
        );
        engine
            .command(&thread_id, Command::Hire, None)
            .expect("hire");
        engine
            .command(&thread_id, Command::Cycle, None)
            .expect("cycle");
        engine.shutdown();
    }

    let engine = Engine::new(
        Arc::new(FileCheckpointStore::new(&root)),
        Arc::new(PreconfiguredDomain::default()),
        manual_options(),
    );
    let before = engine.status(&thread_id).expect("status");
    assert_eq!(before.phase, Phase::Active);
    assert_eq!(before.checkpoint_seq, Some(2));
    assert!(!before.scheduled);

    assert_eq!(engine.recover_schedules().expect("recover"), 1);
    let after = engine.status(&thread_id).expect("status");
    assert!(after.scheduled);
    assert_eq!(after.interval_ms, Some(30_000));
    assert_eq!(after.iteration, 1);

    assert_eq!(engine.tick(&thread_id), TickOutcome::Triggered);
    let state = engine.state(&thread_id).expect("get").expect("stored");
    assert_eq!(state.metrics.iteration, 2);
    assert_eq!(
        engine.checkpoint(&thread_id).expect("get").map(|cp| cp.run_seq),
        Some(3)
    );
}

#[test]
fn runaway_run_is_cut_off_at_the_step_limit() {
    let engine = Engine::new(
        Arc::new(MemoryCheckpointStore::new()),
        Arc::new(PreconfiguredDomain::default()),
        EngineOptions {
            workflow: WorkflowSettings {
                max_steps_per_run: 2,
                ..bypassing()
            },
            timers: false,
            ..EngineOptions::default()
        },
    );
    let report = engine
        .command(&thread_id(), Command::Hire, None)
        .expect("hire");
    assert_eq!(
        report.visited,
        vec![StepId::Bootstrap, StepId::Hire, StepId::Summarize]
    );
    assert_eq!(task_state(&report), TaskState::Failed);
    assert!(report
        .state
        .task
        .as_ref()
        .and_then(|task| task.status.message.as_deref())
        .is_some_and(|message| message.contains("exceeded 2 steps")));
    assert_eq!(report.checkpoint_seq, Some(1));
}

#[test]
fn engine_from_settings_uses_the_configured_backend_and_log() {
    let dir = tempdir().expect("tempdir");
    let mut settings = Settings::for_state_root(dir.path().join("state"));
    settings.checkpoints.backend = CheckpointBackend::Sqlite;
    settings.scheduler.enabled = false;
    settings.onboarding.bypass_delegation_signing = true;

    let engine = Engine::from_settings(&settings, Arc::new(PreconfiguredDomain::default()))
        .expect("engine from settings");
    let report = engine
        .command(&thread_id(), Command::Hire, None)
        .expect("hire");
    assert_eq!(report.state.phase(), Phase::Active);
    assert!(settings.sqlite_path().is_file());

    let status = engine.status(&thread_id()).expect("status");
    let encoded = serde_json::to_value(&status).expect("encode status");
    assert_eq!(encoded["phase"], "active");
    assert_eq!(encoded["scheduled"], true);

    let log = fs::read_to_string(dir.path().join("state").join("logs").join("runtime.log"))
        .expect("runtime log");
    assert!(log.lines().any(|line| line.contains("\"event\":\"run.completed\"")));
    assert!(log.lines().any(|line| line.contains("\"threadId\":\"agent-1\"")));
}

#[test]
fn relative_state_root_is_rejected() {
    let settings = Settings::for_state_root("relative/state");
    let err = Engine::from_settings(&settings, Arc::new(PreconfiguredDomain::default()))
        .err()
        .expect("relative root must fail");
    assert!(matches!(err, EngineError::Config(_)));
    assert!(!err.is_retryable());
}

#[test]
fn armed_timer_drives_cycles_until_fire() {
    let domain = Arc::new(PreconfiguredDomain::default());
    let engine = Engine::new(
        Arc::new(MemoryCheckpointStore::new()),
        domain.clone(),
        EngineOptions {
            workflow: WorkflowSettings {
                cycle_interval_ms: 25,
                min_cycle_interval_ms: 10,
                ..bypassing()
            },
            timers: true,
            ..EngineOptions::default()
        },
    );
    let thread_id = thread_id();
    engine
        .command(&thread_id, Command::Hire, None)
        .expect("hire");

    assert!(
        wait_until(Duration::from_secs(5), || domain.cycles.load(Ordering::SeqCst) >= 2),
        "timer never triggered a cycle"
    );

    let fired = retry_while_busy(|| engine.command(&thread_id, Command::Fire, None))
        .expect("fire");
    assert_eq!(fired.state.phase(), Phase::Fired);
    assert!(!engine.scheduler().is_armed(&thread_id));

    engine.shutdown();
    let settled = domain.cycles.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(100));
    assert_eq!(domain.cycles.load(Ordering::SeqCst), settled);
}

#[test]
fn stored_interval_below_the_floor_is_raised() {
    let store = Arc::new(MemoryCheckpointStore::new());
    let thread_id = thread_id();
    let mut state = StateDocument::default();
    state.lifecycle.phase = Phase::Active;
    state.private.cron_scheduled = true;
    state.private.cycle_interval_ms = Some(5);
    store
        .put(&Checkpoint {
            thread_id: thread_id.clone(),
            run_seq: 1,
            created_at: 1_000,
            reason: CheckpointReason::RunCompleted,
            state,
        })
        .expect("seed checkpoint");

    let engine = Engine::new(
        store,
        Arc::new(PreconfiguredDomain::default()),
        EngineOptions {
            workflow: WorkflowSettings {
                min_cycle_interval_ms: 2_000,
                ..bypassing()
            },
            timers: false,
            ..EngineOptions::default()
        },
    );
    assert_eq!(engine.recover_schedules().expect("recover"), 1);
    assert_eq!(engine.scheduler().interval_for(&thread_id), Some(2_000));
    assert_eq!(
        engine.workflow_settings().cycle_interval(Some(60_000)),
        60_000
    );
}
