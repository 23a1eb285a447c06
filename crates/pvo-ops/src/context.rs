use std::sync::{Arc, Mutex, MutexGuard};

use pvo_host::EventSink;

use crate::{OperationLock, OperationSnapshot, OperationTracker};

/// Shared state for every maintenance operation in the process.
///
/// Built once at startup and handed out as `Arc<OpsContext>`; the lock and
/// tracker inside are the subsystem's only shared mutable state.
pub struct OpsContext {
    lock: OperationLock,
    tracker: Mutex<OperationTracker>,
    sink: Arc<dyn EventSink>,
}

impl OpsContext {
    pub fn new(sink: Arc<dyn EventSink>) -> Arc<Self> {
        Arc::new(Self {
            lock: OperationLock::new(),
            tracker: Mutex::new(OperationTracker::new(sink.clone())),
            sink,
        })
    }

    pub fn lock(&self) -> &OperationLock {
        &self.lock
    }

    pub fn sink(&self) -> &Arc<dyn EventSink> {
        &self.sink
    }

    pub(crate) fn tracker(&self) -> MutexGuard<'_, OperationTracker> {
        self.tracker.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn snapshot(&self) -> OperationSnapshot {
        self.tracker().snapshot()
    }

    /// Acknowledge a finished operation. `false` while one is running.
    pub fn acknowledge(&self) -> bool {
        self.tracker().reset()
    }
}

/// Progress reporter handed to a running operation.
#[derive(Clone)]
pub struct ProgressHandle {
    ctx: Arc<OpsContext>,
}

impl ProgressHandle {
    pub(crate) fn new(ctx: Arc<OpsContext>) -> Self {
        Self { ctx }
    }

    pub fn report(&self, pct: i64, message: Option<&str>) {
        self.ctx.tracker().update_progress(pct, message);
    }
}
