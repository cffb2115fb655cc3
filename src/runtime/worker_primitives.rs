use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

const STOP_POLL_MS: u64 = 50;

/// Sleeps for `total` in short slices. Returns `false` as soon as `stop`
/// is raised, `true` if the full duration elapsed.
pub(crate) fn sleep_with_stop(stop: &AtomicBool, total: Duration) -> bool {
    let mut remaining = total;
    while remaining > Duration::ZERO {
        if stop.load(Ordering::Relaxed) {
            return false;
        }
        let slice = remaining.min(Duration::from_millis(STOP_POLL_MS));
        thread::sleep(slice);
        remaining = remaining.saturating_sub(slice);
    }
    !stop.load(Ordering::Relaxed)
}
