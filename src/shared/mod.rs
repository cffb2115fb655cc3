pub mod errors;
pub mod fs_atomic;
pub mod ids;
pub mod time;

pub use errors::RuntimeError;
pub use fs_atomic::{atomic_write_file, remove_file_if_exists};
pub use ids::{validate_identifier_value, TaskId, ThreadId};
pub use time::now_millis;
