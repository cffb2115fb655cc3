//! Run driver. One run loads the thread's checkpoint, routes the inbound
//! instruction, walks steps until it suspends or reaches `summarize`, and
//! writes exactly one checkpoint at the end.

pub mod error;
pub mod report;

pub use error::EngineError;
pub use report::{RunOutcome, RunReport, ThreadStatus};

use crate::checkpoint::{
    Checkpoint, CheckpointReason, CheckpointStore, FileCheckpointStore, MemoryCheckpointStore,
    SqliteCheckpointStore,
};
use crate::command::{resolve, Command, Inbound, RouteTarget};
use crate::config::{CheckpointBackend, Settings};
use crate::runtime::{
    bootstrap_state_root, BusyProbe, CycleScheduler, CycleTrigger, RunSlots, RuntimeLog,
    StatePaths, TickOutcome,
};
use crate::shared::{now_millis, ThreadId};
use crate::state::{Merger, Phase, RetentionLimits, StateDocument, StatePatch};
use crate::workflow::nodes::{failure_patch, run_step, suspension_patch};
use crate::workflow::{
    AgentDomain, PendingInterrupt, RunContext, StepError, StepId, StepOutcome, WorkflowSettings,
};
use serde_json::Value;
use std::sync::{Arc, Weak};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    pub retention: RetentionLimits,
    pub workflow: WorkflowSettings,
    /// When false, armed threads only tick through [`Engine::tick`].
    pub timers: bool,
    pub log: RuntimeLog,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            retention: RetentionLimits::default(),
            workflow: WorkflowSettings::default(),
            timers: true,
            log: RuntimeLog::disabled(),
        }
    }
}

pub struct Engine {
    store: Arc<dyn CheckpointStore>,
    domain: Arc<dyn AgentDomain>,
    slots: RunSlots,
    scheduler: CycleScheduler,
    merger: Merger,
    workflow: WorkflowSettings,
    log: RuntimeLog,
}

impl Engine {
    pub fn new(
        store: Arc<dyn CheckpointStore>,
        domain: Arc<dyn AgentDomain>,
        options: EngineOptions,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Engine>| {
            let slots = RunSlots::new();
            let probe = slots.clone();
            let busy: BusyProbe = Arc::new(move |thread_id: &ThreadId| probe.is_busy(thread_id));
            let trigger: Weak<dyn CycleTrigger> = weak.clone();
            let scheduler = if options.timers {
                CycleScheduler::new(trigger, busy)
            } else {
                CycleScheduler::manual(trigger, busy)
            };
            Engine {
                store,
                domain,
                slots,
                scheduler,
                merger: Merger::new(options.retention),
                workflow: options.workflow,
                log: options.log,
            }
        })
    }

    /// Builds the configured checkpoint backend under the settings' state
    /// root and wires logging to `<state_root>/logs/runtime.log`.
    pub fn from_settings(
        settings: &Settings,
        domain: Arc<dyn AgentDomain>,
    ) -> Result<Arc<Self>, EngineError> {
        settings.validate()?;
        let paths = StatePaths::new(settings.state_root.clone());
        bootstrap_state_root(&paths)?;

        let store: Arc<dyn CheckpointStore> = match settings.checkpoints.backend {
            CheckpointBackend::File => Arc::new(FileCheckpointStore::new(paths.checkpoints_dir())),
            CheckpointBackend::Sqlite => {
                Arc::new(SqliteCheckpointStore::open(&settings.sqlite_path())?)
            }
            CheckpointBackend::Memory => Arc::new(MemoryCheckpointStore::new()),
        };
        let log = RuntimeLog::for_paths(&paths);
        log.info(
            "engine.started",
            None,
            &format!(
                "checkpoint backend {}, scheduler {}",
                settings.checkpoints.backend,
                if settings.scheduler.enabled { "enabled" } else { "manual" }
            ),
        );

        Ok(Self::new(
            store,
            domain,
            EngineOptions {
                retention: settings.retention_limits(),
                workflow: settings.workflow_settings(),
                timers: settings.scheduler.enabled,
                log,
            },
        ))
    }

    pub fn scheduler(&self) -> &CycleScheduler {
        &self.scheduler
    }

    pub fn workflow_settings(&self) -> WorkflowSettings {
        self.workflow
    }

    pub fn command(
        &self,
        thread_id: &ThreadId,
        command: Command,
        client_mutation_id: Option<&str>,
    ) -> Result<RunReport, EngineError> {
        self.submit(thread_id, Inbound::command(command, client_mutation_id))
    }

    pub fn resume(&self, thread_id: &ThreadId, response: Value) -> Result<RunReport, EngineError> {
        self.submit(thread_id, Inbound::resume(response))
    }

    pub fn submit(&self, thread_id: &ThreadId, inbound: Inbound) -> Result<RunReport, EngineError> {
        self.submit_at(thread_id, inbound, now_millis())
    }

    /// Starts one run with an explicit clock reading.
    ///
    /// Fails with [`EngineError::ThreadBusy`] while another run holds the
    /// thread; the caller decides whether to retry.
    pub fn submit_at(
        &self,
        thread_id: &ThreadId,
        inbound: Inbound,
        now: i64,
    ) -> Result<RunReport, EngineError> {
        let Some(_slot) = self.slots.try_acquire(thread_id) else {
            self.log
                .warn("run.rejected_busy", Some(thread_id), "run already in flight");
            return Err(EngineError::ThreadBusy {
                thread_id: thread_id.to_string(),
            });
        };
        self.run_exclusive(thread_id, &inbound, now)
    }

    pub fn checkpoint(&self, thread_id: &ThreadId) -> Result<Option<Checkpoint>, EngineError> {
        Ok(self.store.get(thread_id)?)
    }

    pub fn state(&self, thread_id: &ThreadId) -> Result<Option<StateDocument>, EngineError> {
        Ok(self.store.get(thread_id)?.map(|checkpoint| checkpoint.state))
    }

    pub fn status(&self, thread_id: &ThreadId) -> Result<ThreadStatus, EngineError> {
        let checkpoint = self.store.get(thread_id)?;
        let checkpoint_seq = checkpoint.as_ref().map(|checkpoint| checkpoint.run_seq);
        let state = checkpoint.map(|checkpoint| checkpoint.state).unwrap_or_default();
        Ok(ThreadStatus {
            thread_id: thread_id.clone(),
            phase: state.phase(),
            task_id: state.task.as_ref().map(|task| task.id.clone()),
            task_state: state.task.as_ref().map(|task| task.status.state),
            pending_interrupt: state
                .private
                .pending_interrupt
                .as_ref()
                .map(|pending| pending.kind()),
            iteration: state.metrics.iteration,
            checkpoint_seq,
            scheduled: self.scheduler.is_armed(thread_id),
            interval_ms: self.scheduler.interval_for(thread_id),
            busy: self.slots.is_busy(thread_id),
        })
    }

    pub fn tick(&self, thread_id: &ThreadId) -> TickOutcome {
        self.scheduler.tick(thread_id)
    }

    /// Re-arms timers for every stored thread that was active and
    /// scheduled when the process last wrote its checkpoint.
    pub fn recover_schedules(&self) -> Result<usize, EngineError> {
        let mut armed = 0;
        for thread_id in self.store.threads()? {
            let Some(checkpoint) = self.store.get(&thread_id)? else {
                continue;
            };
            if !wants_timer(&checkpoint.state) {
                continue;
            }
            let interval = self.interval_for(&checkpoint.state);
            if self.scheduler.ensure(&thread_id, interval)? {
                armed += 1;
                self.log.info(
                    "scheduler.recovered",
                    Some(&thread_id),
                    &format!("every {interval}ms"),
                );
            }
        }
        Ok(armed)
    }

    pub fn shutdown(&self) {
        self.scheduler.shutdown();
        self.log.info("engine.stopped", None, "scheduler drained");
    }

    fn run_exclusive(
        &self,
        thread_id: &ThreadId,
        inbound: &Inbound,
        now: i64,
    ) -> Result<RunReport, EngineError> {
        let (mut state, last_seq) = match self.store.get(thread_id)? {
            Some(checkpoint) => (checkpoint.state, checkpoint.run_seq),
            None => (StateDocument::default(), 0),
        };

        let resolution = resolve(&state, inbound, self.workflow.bypass_delegation_signing);
        let entry = match resolution.target {
            RouteTarget::Step(step) => step,
            RouteTarget::NoOp(reason) => {
                self.log.info("run.skipped", Some(thread_id), reason.as_str());
                return Ok(RunReport {
                    thread_id: thread_id.clone(),
                    outcome: RunOutcome::Skipped(reason),
                    checkpoint_seq: None,
                    visited: Vec::new(),
                    state,
                });
            }
        };
        if !resolution.side_effects.is_empty() {
            state = self
                .merger
                .merge(&state, &StatePatch::private(resolution.side_effects));
        }

        let run_seq = last_seq + 1;
        let ctx = RunContext {
            thread_id: thread_id.clone(),
            command: inbound.envelope.command,
            resume: inbound.resume.clone(),
            now,
            run_seq,
            settings: self.workflow,
        };
        self.log.info(
            "run.started",
            Some(thread_id),
            &format!("run {run_seq} entering at {entry}"),
        );

        let (state, visited, suspended) = self.drive(entry, state, &ctx);

        let reason = if suspended.is_some() {
            CheckpointReason::Suspended
        } else {
            CheckpointReason::RunCompleted
        };
        let checkpoint = Checkpoint {
            thread_id: thread_id.clone(),
            run_seq,
            created_at: now,
            reason,
            state,
        };
        if let Err(err) = self.store.put(&checkpoint) {
            self.log
                .error("checkpoint.write_failed", Some(thread_id), &err.to_string());
            return Err(err.into());
        }
        self.sync_schedule(thread_id, &checkpoint.state);

        let outcome = match suspended {
            Some(interrupt) => {
                self.log.info(
                    "run.suspended",
                    Some(thread_id),
                    &format!("run {run_seq} waiting on {}", interrupt.kind().as_str()),
                );
                RunOutcome::Suspended { interrupt }
            }
            None => {
                let task_state = checkpoint.state.task.as_ref().map(|task| task.status.state);
                self.log.info(
                    "run.completed",
                    Some(thread_id),
                    &format!(
                        "run {run_seq} finished with task {}",
                        task_state.map_or("none", |state| state.as_str())
                    ),
                );
                RunOutcome::Completed { task_state }
            }
        };
        Ok(RunReport {
            thread_id: thread_id.clone(),
            outcome,
            checkpoint_seq: Some(run_seq),
            visited,
            state: checkpoint.state,
        })
    }

    fn drive(
        &self,
        entry: StepId,
        mut state: StateDocument,
        ctx: &RunContext,
    ) -> (StateDocument, Vec<StepId>, Option<PendingInterrupt>) {
        let run_start = state.clone();
        let mut visited = Vec::new();
        let mut step = entry;

        loop {
            if visited.len() >= self.workflow.max_steps_per_run {
                let error = StepError::Execution(format!(
                    "run exceeded {} steps",
                    self.workflow.max_steps_per_run
                ));
                self.log
                    .error("run.step_limit", Some(&ctx.thread_id), &error.to_string());
                state = self
                    .merger
                    .merge(&state, &failure_patch(&state, &error, ctx.now));
                visited.push(StepId::Summarize);
                if let StepOutcome::Continue(patch) = run_step(
                    StepId::Summarize,
                    &state,
                    &run_start,
                    ctx,
                    self.domain.as_ref(),
                ) {
                    state = self.merger.merge(&state, &patch);
                }
                return (state, visited, None);
            }

            visited.push(step);
            match run_step(step, &state, &run_start, ctx, self.domain.as_ref()) {
                StepOutcome::Continue(patch) => {
                    state = self.merger.merge(&state, &patch);
                    match step.default_next() {
                        Some(next) => step = next,
                        None => return (state, visited, None),
                    }
                }
                StepOutcome::Goto { patch, next } => {
                    state = self.merger.merge(&state, &patch);
                    step = next;
                }
                StepOutcome::Suspend { patch, request } => {
                    state = self.merger.merge(&state, &patch);
                    let (suspension, pending) = suspension_patch(&state, step, request, ctx.now);
                    state = self.merger.merge(&state, &suspension);
                    return (state, visited, Some(pending));
                }
            }
        }
    }

    fn sync_schedule(&self, thread_id: &ThreadId, state: &StateDocument) {
        if !wants_timer(state) {
            if self.scheduler.cancel(thread_id) {
                self.log
                    .info("scheduler.canceled", Some(thread_id), "cycles stopped");
            }
            return;
        }
        let interval = self.interval_for(state);
        match self.scheduler.ensure(thread_id, interval) {
            Ok(true) => self.log.info(
                "scheduler.armed",
                Some(thread_id),
                &format!("every {interval}ms"),
            ),
            Ok(false) => {}
            Err(err) => self
                .log
                .error("scheduler.arm_failed", Some(thread_id), &err.to_string()),
        }
    }

    fn interval_for(&self, state: &StateDocument) -> u64 {
        self.workflow.cycle_interval(state.private.cycle_interval_ms)
    }
}

impl CycleTrigger for Engine {
    fn trigger_cycle(&self, thread_id: &ThreadId) -> TickOutcome {
        match self.submit(thread_id, Inbound::command(Command::Cycle, None)) {
            Ok(_) => TickOutcome::Triggered,
            Err(EngineError::ThreadBusy { .. }) => {
                self.log
                    .info("scheduler.tick_skipped", Some(thread_id), "run in flight");
                TickOutcome::SkippedBusy
            }
            Err(err) => {
                let message = err.to_string();
                self.log
                    .error("scheduler.tick_failed", Some(thread_id), &message);
                TickOutcome::Failed(message)
            }
        }
    }
}

fn wants_timer(state: &StateDocument) -> bool {
    state.private.cron_scheduled && state.phase() == Phase::Active
}
