pub mod checkpoint;
pub mod command;
pub mod config;
pub mod engine;
pub mod runtime;
pub mod shared;
pub mod state;
pub mod workflow;
