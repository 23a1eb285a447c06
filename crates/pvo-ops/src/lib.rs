//! pvo-ops
//!
//! Single-flight execution for maintenance operations.
//!
//! - [`OperationLock`] admits exactly one named operation at a time. It never
//!   queues or waits.
//! - [`OperationTracker`] records the lifecycle of the active or most recent
//!   operation and publishes started/progress/completed events.
//! - [`OperationRunner`] composes both around an async operation and is the
//!   only layer that turns failures (including panics) into a plain
//!   [`OperationResult`]. A run whose future is dropped mid-flight is
//!   recorded as failed (`operation abandoned`) before the lock is freed;
//!   [`OperationRunner::spawn`] keeps a run alive when only its caller goes away.
//!
//! All three share one [`OpsContext`], built once and passed by `Arc`.

mod context;
mod lock;
mod runner;
mod tracker;

pub use context::{OpsContext, ProgressHandle};
pub use lock::{LockError, OperationLock};
pub use runner::{
    OperationResult, OperationRunner, ReasonCode, REASON_ABANDONED_MSG, REASON_BUSY, REASON_JOIN,
    REASON_PANICKED,
};
pub use tracker::{OperationSnapshot, OperationState, OperationTracker};
