//! Sync and ingest orchestration.

pub mod machine;
pub mod pipeline;
pub mod sink;

pub use machine::{MachineConfig, StateMachine};
pub use pipeline::PipelineDeps;
