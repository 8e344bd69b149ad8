//! Standard task library
//!
//! Built-in task runners that are useful for trying out workflows

mod debug;
mod time;

pub use debug::LogTask;
pub use time::DelayTask;
use taskruntime::TaskRegistry;

use std::sync::Arc;

/// Register all standard task runners with a registry
pub fn register_all(registry: &mut TaskRegistry) {
    registry.register(Arc::new(debug::LogTask));
    registry.register(Arc::new(time::DelayTask));
}
