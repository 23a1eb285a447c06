//! Operation lifecycle record.
//!
//! `idle -> running -> {success, failed}`, back to `idle` on an explicit
//! reset. Every transition is published on the event sink.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use pvo_host::{topics, EventSink};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, info};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationState {
    Idle,
    Queued,
    Running,
    Success,
    Failed,
}

impl OperationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationState::Idle => "idle",
            OperationState::Queued => "queued",
            OperationState::Running => "running",
            OperationState::Success => "success",
            OperationState::Failed => "failed",
        }
    }
}

/// Exported view of the tracker. Field names match the status entity
/// attributes consumers already read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationSnapshot {
    pub op_state: OperationState,
    /// Fresh per start; correlates the lifecycle events of one run.
    pub op_id: Option<Uuid>,
    pub op_name: Option<String>,
    pub op_started: Option<DateTime<Utc>>,
    pub op_finished: Option<DateTime<Utc>>,
    pub op_progress: u8,
    pub op_duration_ms: Option<u64>,
    pub last_action: Option<String>,
    pub last_action_time: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_error_time: Option<DateTime<Utc>>,
}

pub struct OperationTracker {
    sink: Arc<dyn EventSink>,
    state: OperationState,
    id: Option<Uuid>,
    name: Option<String>,
    started: Option<DateTime<Utc>>,
    finished: Option<DateTime<Utc>>,
    progress: u8,
    last_action: Option<String>,
    last_action_time: Option<DateTime<Utc>>,
    last_error: Option<String>,
    last_error_time: Option<DateTime<Utc>>,
}

impl OperationTracker {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            sink,
            state: OperationState::Idle,
            id: None,
            name: None,
            started: None,
            finished: None,
            progress: 0,
            last_action: None,
            last_action_time: None,
            last_error: None,
            last_error_time: None,
        }
    }

    pub fn state(&self) -> OperationState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == OperationState::Running
    }

    pub fn start(&mut self, name: &str) {
        let now = Utc::now();
        let id = Uuid::new_v4();
        self.state = OperationState::Running;
        self.id = Some(id);
        self.name = Some(name.to_string());
        self.started = Some(now);
        self.finished = None;
        self.progress = 0;

        info!(operation = %name, op_id = %id, "operation started");
        self.sink.publish(
            topics::OPERATION_STARTED,
            json!({ "operation": name, "op_id": id, "started": now.to_rfc3339() }),
        );
    }

    /// Clamp to [0, 100] and publish. State is never changed here.
    pub fn update_progress(&mut self, pct: i64, message: Option<&str>) {
        self.progress = pct.clamp(0, 100) as u8;
        match message {
            Some(m) => debug!(progress = self.progress, message = %m, "operation progress"),
            None => debug!(progress = self.progress, "operation progress"),
        }
        self.sink.publish(
            topics::OPERATION_PROGRESS,
            json!({
                "operation": self.name,
                "progress": self.progress,
                "message": message,
            }),
        );
    }

    pub fn complete(&mut self, success: bool, err: Option<&str>) {
        let now = Utc::now();
        self.state = if success {
            OperationState::Success
        } else {
            OperationState::Failed
        };
        self.finished = Some(now);
        if success {
            self.progress = 100;
        }
        self.last_action = self.name.clone();
        self.last_action_time = Some(now);

        let op = self.name.clone().unwrap_or_default();
        if success {
            info!(operation = %op, duration_ms = ?self.duration_ms(), "operation completed");
        } else {
            self.last_error = err.map(str::to_string);
            self.last_error_time = Some(now);
            error!(operation = %op, error = ?err, "operation failed");
        }

        self.sink.publish(
            topics::OPERATION_COMPLETED,
            json!({
                "operation": self.name,
                "op_id": self.id,
                "success": success,
                "error": err,
                "finished": now.to_rfc3339(),
                "duration_ms": self.duration_ms(),
            }),
        );
    }

    /// Back to idle once a finished operation has been acknowledged.
    ///
    /// Returns `false` (and changes nothing) while an operation is running.
    /// `last_*` fields survive the reset.
    pub fn reset(&mut self) -> bool {
        if self.is_running() {
            return false;
        }
        self.state = OperationState::Idle;
        self.id = None;
        self.name = None;
        self.started = None;
        self.finished = None;
        self.progress = 0;
        true
    }

    /// Finish minus start; while running, now minus start.
    pub fn duration_ms(&self) -> Option<u64> {
        let started = self.started?;
        let end = self.finished.unwrap_or_else(Utc::now);
        Some((end - started).num_milliseconds().max(0) as u64)
    }

    pub fn snapshot(&self) -> OperationSnapshot {
        OperationSnapshot {
            op_state: self.state,
            op_id: self.id,
            op_name: self.name.clone(),
            op_started: self.started,
            op_finished: self.finished,
            op_progress: self.progress,
            op_duration_ms: self.duration_ms(),
            last_action: self.last_action.clone(),
            last_action_time: self.last_action_time,
            last_error: self.last_error.clone(),
            last_error_time: self.last_error_time,
        }
    }
}
