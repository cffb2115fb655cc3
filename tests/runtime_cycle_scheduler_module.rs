use agentloop::runtime::{BusyProbe, CycleScheduler, CycleTrigger, RunSlots, TickOutcome};
use agentloop::shared::ThreadId;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Default)]
struct RecordingTrigger {
    calls: AtomicUsize,
    seen: Mutex<Vec<String>>,
}

impl CycleTrigger for RecordingTrigger {
    fn trigger_cycle(&self, thread_id: &ThreadId) -> TickOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen
            .lock()
            .expect("seen lock")
            .push(thread_id.to_string());
        TickOutcome::Triggered
    }
}

fn thread_id(raw: &str) -> ThreadId {
    ThreadId::parse(raw).expect("thread id")
}

fn never_busy() -> BusyProbe {
    Arc::new(|_: &ThreadId| false)
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

#[test]
fn ensure_arms_each_thread_once() {
    let trigger = Arc::new(RecordingTrigger::default());
    let dyn_trigger: Arc<dyn CycleTrigger> = trigger.clone();
    let scheduler = CycleScheduler::manual(Arc::downgrade(&dyn_trigger), never_busy());
    let alpha = thread_id("alpha");
    let beta = thread_id("beta");

    assert!(scheduler.ensure(&alpha, 1_000).expect("arm alpha"));
    assert!(!scheduler.ensure(&alpha, 1_000).expect("re-arm alpha"));
    assert!(scheduler.ensure(&beta, 2_000).expect("arm beta"));
    assert_eq!(scheduler.armed_threads(), vec![alpha.clone(), beta.clone()]);
    assert_eq!(scheduler.interval_for(&beta), Some(2_000));

    assert_eq!(scheduler.tick(&alpha), TickOutcome::Triggered);
    assert_eq!(trigger.calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        trigger.seen.lock().expect("seen").as_slice(),
        &["alpha".to_string()]
    );
}

#[test]
fn tick_is_skipped_while_the_thread_is_busy() {
    let trigger = Arc::new(RecordingTrigger::default());
    let dyn_trigger: Arc<dyn CycleTrigger> = trigger.clone();
    let slots = RunSlots::new();
    let probe = slots.clone();
    let busy: BusyProbe = Arc::new(move |thread_id: &ThreadId| probe.is_busy(thread_id));
    let scheduler = CycleScheduler::manual(Arc::downgrade(&dyn_trigger), busy);
    let alpha = thread_id("alpha");
    scheduler.ensure(&alpha, 1_000).expect("arm");

    let guard = slots.try_acquire(&alpha).expect("slot");
    assert_eq!(scheduler.tick(&alpha), TickOutcome::SkippedBusy);
    assert_eq!(trigger.calls.load(Ordering::SeqCst), 0);

    drop(guard);
    assert_eq!(scheduler.tick(&alpha), TickOutcome::Triggered);
    assert_eq!(trigger.calls.load(Ordering::SeqCst), 1);
}

#[test]
fn cancel_stops_future_ticks_only() {
    let trigger = Arc::new(RecordingTrigger::default());
    let dyn_trigger: Arc<dyn CycleTrigger> = trigger.clone();
    let scheduler = CycleScheduler::manual(Arc::downgrade(&dyn_trigger), never_busy());
    let alpha = thread_id("alpha");

    assert_eq!(scheduler.tick(&alpha), TickOutcome::NotArmed);
    scheduler.ensure(&alpha, 1_000).expect("arm");
    assert!(scheduler.cancel(&alpha));
    assert!(!scheduler.is_armed(&alpha));
    assert_eq!(scheduler.tick(&alpha), TickOutcome::NotArmed);
    assert_eq!(trigger.calls.load(Ordering::SeqCst), 0);

    assert!(scheduler.ensure(&alpha, 500).expect("re-arm after cancel"));
    assert_eq!(scheduler.interval_for(&alpha), Some(500));
}

#[test]
fn timers_deliver_ticks_until_shutdown() {
    let trigger = Arc::new(RecordingTrigger::default());
    let dyn_trigger: Arc<dyn CycleTrigger> = trigger.clone();
    let scheduler = CycleScheduler::new(Arc::downgrade(&dyn_trigger), never_busy());
    let alpha = thread_id("alpha");
    scheduler.ensure(&alpha, 20).expect("arm");

    assert!(
        wait_until(Duration::from_secs(5), || trigger
            .calls
            .load(Ordering::SeqCst)
            >= 2),
        "timer never fired"
    );

    scheduler.shutdown();
    assert!(scheduler.armed_threads().is_empty());
    let after_shutdown = trigger.calls.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(100));
    assert_eq!(trigger.calls.load(Ordering::SeqCst), after_shutdown);
}

#[test]
fn dropped_trigger_reports_not_armed() {
    let dyn_trigger: Arc<dyn CycleTrigger> = Arc::new(RecordingTrigger::default());
    let scheduler = CycleScheduler::manual(Arc::downgrade(&dyn_trigger), never_busy());
    let alpha = thread_id("alpha");
    scheduler.ensure(&alpha, 1_000).expect("arm");

    drop(dyn_trigger);
    assert_eq!(scheduler.tick(&alpha), TickOutcome::NotArmed);
}
