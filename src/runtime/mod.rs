pub mod cycle_scheduler;
pub mod logging;
pub mod single_flight;
pub mod state_paths;
pub(crate) mod worker_primitives;

pub use crate::shared::RuntimeError;
pub use cycle_scheduler::{BusyProbe, CycleScheduler, CycleTrigger, TickOutcome};
pub use logging::RuntimeLog;
pub use single_flight::{RunSlotGuard, RunSlots};
pub use state_paths::{bootstrap_state_root, StatePaths};
