pub mod envelope;
pub mod gateway;

pub use envelope::{Command, CommandEnvelope, Inbound};
pub use gateway::{resolve, route_after_bootstrap, NoOpReason, Resolution, RouteTarget};
