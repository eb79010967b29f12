use crate::connection::PooledConnection;
use crate::Driver;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;

/// Remove reclaimable entries from `set` and hand them back for closing.
///
/// With `force` every entry goes; otherwise only idle ones (no lease, no
/// pending statement). Entries are returned rather than closed here so the
/// caller can close them after releasing its lock.
pub fn take_reclaimable<D: Driver>(
    set: &mut HashMap<u64, Arc<PooledConnection<D>>>,
    force: bool,
) -> Vec<Arc<PooledConnection<D>>> {
    let ids: Vec<u64> = set
        .iter()
        .filter(|(_, conn)| force || conn.is_idle())
        .map(|(id, _)| *id)
        .collect();
    ids.into_iter().filter_map(|id| set.remove(&id)).collect()
}

/// A deferred sweep running on the tokio runtime.
///
/// At most one is pending at a time; scheduling while one is pending
/// reuses it. The task can be awaited with [`settle`](Self::settle) or
/// cancelled with [`cancel`](Self::cancel).
#[derive(Debug, Default)]
pub struct ScheduledSweep {
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ScheduledSweep {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `task` unless a sweep is already pending. Returns whether a new
    /// task was spawned. Without a tokio runtime nothing is scheduled.
    pub fn schedule<F>(&self, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            log::warn!("no tokio runtime, idle sweep not scheduled");
            return false;
        };
        let mut handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(pending) = handle.as_ref() {
            if !pending.is_finished() {
                return false;
            }
        }
        *handle = Some(runtime.spawn(task));
        true
    }

    pub fn is_pending(&self) -> bool {
        self.handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Wait for the pending sweep, if any, to finish.
    pub async fn settle(&self) {
        let pending = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = pending {
            // a cancelled sweep is fine to ignore
            _ = handle.await;
        }
    }

    /// Abort the pending sweep. Returns whether one was pending.
    pub fn cancel(&self) -> bool {
        let pending = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match pending {
            Some(handle) if !handle.is_finished() => {
                handle.abort();
                true
            }
            _ => false,
        }
    }
}
