//! pvo-guard
//!
//! Preflight gate for risky device actions.
//!
//! The latest quality-gate summary lives as attributes on
//! [`pvo_host::STATUS_ENTITY`]. A flash may proceed only when:
//! 1. a summary exists (`gates_overall` and `gates_last_run` present),
//! 2. it is fresh (`gates_last_run` within the freshness window),
//! 3. it passed (`warn` is accepted only with strict gating off).
//!
//! Decisions are computed from scratch on every call and never cached.
//! [`evaluate`] is pure (no IO, no clock) so every branch is testable.

use chrono::{DateTime, NaiveDateTime, Utc};
use pvo_config::GateSettings;
use pvo_host::{EntityState, Telemetry, STATUS_ENTITY};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    GatesMissing,
    GatesStale,
    GatesFailed,
    GatesWarned,
    InvalidTimestamp,
}

impl BlockReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockReason::GatesMissing => "gates_missing",
            BlockReason::GatesStale => "gates_stale",
            BlockReason::GatesFailed => "gates_failed",
            BlockReason::GatesWarned => "gates_warned",
            BlockReason::InvalidTimestamp => "invalid_timestamp",
        }
    }

    /// Inverse of [`as_str`](Self::as_str).
    pub fn from_code(code: &str) -> Option<Self> {
        [
            BlockReason::GatesMissing,
            BlockReason::GatesStale,
            BlockReason::GatesFailed,
            BlockReason::GatesWarned,
            BlockReason::InvalidTimestamp,
        ]
        .into_iter()
        .find(|r| r.as_str() == code)
    }
}

/// Outcome of one guard evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardDecision {
    pub passed: bool,
    pub block_reason: Option<BlockReason>,
    pub message: String,
}

impl GuardDecision {
    fn pass(message: impl Into<String>) -> Self {
        Self {
            passed: true,
            block_reason: None,
            message: message.into(),
        }
    }

    fn block(reason: BlockReason, message: impl Into<String>) -> Self {
        Self {
            passed: false,
            block_reason: Some(reason),
            message: message.into(),
        }
    }

    /// `Err` for any decision that did not pass.
    pub fn into_result(self) -> Result<(), GuardBlocked> {
        match self.block_reason {
            Some(reason) if !self.passed => Err(GuardBlocked {
                reason,
                message: self.message,
            }),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct GuardBlocked {
    pub reason: BlockReason,
    pub message: String,
}

// ---------------------------------------------------------------------------
// Gate status
// ---------------------------------------------------------------------------

/// Gate summary as published on the status entity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GateStatus {
    pub overall: Option<String>,
    pub last_run: Option<Value>,
    pub failed: Vec<String>,
    pub warned: Vec<String>,
}

impl GateStatus {
    pub fn from_entity(entity: &EntityState) -> Self {
        let str_list = |key: &str| -> Vec<String> {
            entity
                .attribute(key)
                .and_then(|v| v.as_array())
                .map(|arr| {
                    arr.iter()
                        .filter_map(|x| x.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default()
        };
        Self {
            overall: entity
                .attribute("gates_overall")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            last_run: entity
                .attribute("gates_last_run")
                .filter(|v| !v.is_null())
                .cloned(),
            failed: str_list("gates_fail"),
            warned: str_list("gates_warn"),
        }
    }
}

/// RFC 3339, or a naive ISO timestamp taken as UTC.
fn parse_last_run(v: &Value) -> Option<DateTime<Utc>> {
    let s = v.as_str()?.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|n| n.and_utc())
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Evaluate the flash guard against a gate summary.
///
/// `status` is `None` when the status entity does not exist at all.
pub fn evaluate(
    status: Option<&GateStatus>,
    now: DateTime<Utc>,
    settings: &GateSettings,
) -> GuardDecision {
    let Some(status) = status else {
        return GuardDecision::block(
            BlockReason::GatesMissing,
            "Status sensor not found - cannot validate gates",
        );
    };

    let Some(overall) = status.overall.as_deref() else {
        warn!("flash blocked: gates_overall is null");
        return GuardDecision::block(
            BlockReason::GatesMissing,
            "Quality gates not run - press 'Run Gates' first",
        );
    };
    let Some(raw_last_run) = status.last_run.as_ref() else {
        warn!("flash blocked: gates_last_run is null");
        return GuardDecision::block(
            BlockReason::GatesMissing,
            "Gates timestamp missing - press 'Run Gates' first",
        );
    };

    let Some(last_run) = parse_last_run(raw_last_run) else {
        warn!(gates_last_run = %raw_last_run, "flash blocked: unparseable gates_last_run");
        return GuardDecision::block(
            BlockReason::InvalidTimestamp,
            "Gates timestamp invalid format - run gates again",
        );
    };

    let age = now - last_run;
    let window_secs = settings.freshness_window().as_secs() as i64;
    if age.num_seconds() > window_secs {
        let age_min = age.num_minutes();
        warn!(age_min, limit_min = settings.freshness_minutes, "flash blocked: gates too old");
        return GuardDecision::block(
            BlockReason::GatesStale,
            format!("Gates expired ({age_min}min old) - run gates again"),
        );
    }

    match overall {
        "pass" => {
            info!(age_secs = age.num_seconds(), "flash guards passed");
            GuardDecision::pass("Flash guards passed")
        }
        "fail" => {
            let list = status.failed.join(", ");
            warn!(failed = %list, "flash blocked: gates failed");
            GuardDecision::block(
                BlockReason::GatesFailed,
                format!("Gates FAILED: {list} - fix issues first"),
            )
        }
        "warn" if settings.strict => {
            let list = status.warned.join(", ");
            warn!(warned = %list, "flash blocked: gates warned");
            GuardDecision::block(
                BlockReason::GatesWarned,
                format!("Gates WARNED: {list} - resolve warnings"),
            )
        }
        "warn" => {
            let list = status.warned.join(", ");
            warn!(warned = %list, "flash allowed with gate warnings (strict gating off)");
            GuardDecision::pass(format!("Flash guards passed with warnings: {list}"))
        }
        other => {
            warn!(gates_overall = %other, "flash blocked: unexpected gate summary");
            GuardDecision::block(
                BlockReason::GatesFailed,
                format!("Gates status '{other}' not acceptable"),
            )
        }
    }
}

/// Read the status entity from telemetry and evaluate it.
pub fn check_flash_guards(
    telemetry: &dyn Telemetry,
    now: DateTime<Utc>,
    settings: &GateSettings,
) -> GuardDecision {
    let status = telemetry.entity(STATUS_ENTITY).map(|e| GateStatus::from_entity(&e));
    evaluate(status.as_ref(), now, settings)
}
