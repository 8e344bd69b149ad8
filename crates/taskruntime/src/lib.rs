//! Workflow execution runtime
//!
//! This crate holds the task runner registry, the per-workflow driver loop
//! and the runner that submits, recovers and sweeps workflows.

mod driver;
mod registry;
mod runtime;

pub use driver::{DriverExit, WorkflowDriver};
pub use registry::TaskRegistry;
pub use runtime::{wait_all, DriverHandle, RetentionPolicy, RuntimeConfig, WorkflowRunner};
