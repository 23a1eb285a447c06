use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{error, warn};

use crate::{OpsContext, ProgressHandle};

pub const REASON_BUSY: &str = "op_busy";
pub const REASON_PANICKED: &str = "operation_panicked";
pub const REASON_JOIN: &str = "operation_join_failed";

/// Tracker error recorded when a run is dropped before it finishes.
pub const REASON_ABANDONED_MSG: &str = "operation abandoned";

/// Machine-readable code attached to a failed [`OperationResult`].
pub trait ReasonCode {
    fn reason_code(&self) -> &'static str;
}

impl ReasonCode for anyhow::Error {
    fn reason_code(&self) -> &'static str {
        "operation_failed"
    }
}

/// Uniform record returned for every run, busy refusals included.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationResult<T> {
    pub success: bool,
    pub result: Option<T>,
    pub error: Option<String>,
    pub reason: Option<String>,
    pub duration_ms: u64,
}

impl<T> OperationResult<T> {
    fn failed(error: String, reason: &str, duration_ms: u64) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error),
            reason: Some(reason.to_string()),
            duration_ms,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.reason.as_deref() == Some(REASON_BUSY)
    }
}

/// Finalizes the run when dropped, so every exit path unlocks.
///
/// A run dropped before it reported an outcome (its future was abandoned
/// mid-flight) is recorded as failed before the lock is freed.
struct RunGuard<'a> {
    ctx: &'a OpsContext,
    name: &'a str,
    finalized: bool,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if !self.finalized {
            warn!(operation = %self.name, "operation abandoned before completion");
            self.ctx
                .tracker()
                .complete(false, Some(REASON_ABANDONED_MSG));
        }
        // Mismatch is already logged inside release().
        let _ = self.ctx.lock().release(self.name);
    }
}

#[derive(Clone)]
pub struct OperationRunner {
    ctx: Arc<OpsContext>,
}

impl OperationRunner {
    pub fn new(ctx: Arc<OpsContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Arc<OpsContext> {
        &self.ctx
    }

    /// Run `op` under the lock with lifecycle tracking.
    ///
    /// Never returns an error and never unwinds: operation failures and panics
    /// are folded into the result record.
    pub async fn run<T, E, F, Fut>(&self, name: &str, op: F) -> OperationResult<T>
    where
        F: FnOnce(ProgressHandle) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display + ReasonCode,
    {
        if let Err(held) = self.ctx.lock().try_acquire(name) {
            return OperationResult::failed(
                format!("Operation blocked: {held} already running"),
                REASON_BUSY,
                0,
            );
        }
        let mut guard = RunGuard {
            ctx: &self.ctx,
            name,
            finalized: false,
        };

        self.ctx.tracker().start(name);
        let progress = ProgressHandle::new(self.ctx.clone());

        // `op` is called inside the unwind boundary so a panic while building
        // the future is contained too.
        let outcome = AssertUnwindSafe(async move { op(progress).await })
            .catch_unwind()
            .await;

        guard.finalized = true;
        let mut tracker = self.ctx.tracker();
        match outcome {
            Ok(Ok(value)) => {
                tracker.complete(true, None);
                OperationResult {
                    success: true,
                    result: Some(value),
                    error: None,
                    reason: None,
                    duration_ms: tracker.duration_ms().unwrap_or(0),
                }
            }
            Ok(Err(e)) => {
                let msg = format!("{e:#}");
                warn!(operation = %name, reason = e.reason_code(), error = %msg, "operation failed");
                tracker.complete(false, Some(&msg));
                OperationResult::failed(msg, e.reason_code(), tracker.duration_ms().unwrap_or(0))
            }
            Err(panic) => {
                let msg = format!("operation panicked: {}", panic_message(panic.as_ref()));
                error!(operation = %name, error = %msg, "operation panicked");
                tracker.complete(false, Some(&msg));
                OperationResult::failed(msg, REASON_PANICKED, tracker.duration_ms().unwrap_or(0))
            }
        }
    }
}

impl OperationRunner {
    /// Like [`run`](Self::run), on its own task.
    ///
    /// Dropping the returned handle abandons only the result: the operation
    /// keeps the lock and runs to completion. Request handlers use this so a
    /// client disconnect cannot cut a device session short.
    pub fn spawn<T, E, F, Fut>(
        &self,
        name: &'static str,
        op: F,
    ) -> JoinHandle<OperationResult<T>>
    where
        T: Send + 'static,
        F: FnOnce(ProgressHandle) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: fmt::Display + ReasonCode + Send + 'static,
    {
        let runner = self.clone();
        tokio::spawn(async move { runner.run(name, op).await })
    }

    /// Await a [`spawn`](Self::spawn)ed run, folding a task failure into the
    /// result record.
    pub async fn join<T>(handle: JoinHandle<OperationResult<T>>) -> OperationResult<T> {
        match handle.await {
            Ok(out) => out,
            Err(e) => {
                error!(error = %e, "operation task failed");
                OperationResult::failed(format!("operation task failed: {e}"), REASON_JOIN, 0)
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
