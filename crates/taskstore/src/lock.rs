use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Process-wide write-intent lock.
///
/// Held for the whole duration of every multi-row write so that two
/// transactions never interleave on a shared connection. Single-row writes
/// and reads do not take it.
#[derive(Clone, Default)]
pub struct WriteLock {
    inner: Arc<Mutex<()>>,
}

impl WriteLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self) -> OwnedMutexGuard<()> {
        self.inner.clone().lock_owned().await
    }
}
