//! Request and response types for all pvo-daemon HTTP endpoints.
//!
//! No business logic lives here.

use pvo_flash::{FlashReport, RestartReport};
use pvo_ops::{OperationResult, OperationSnapshot};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// /v1/health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: String,
    pub version: String,
    pub daemon_uptime_secs: u64,
    pub config_hash: Option<String>,
}

// ---------------------------------------------------------------------------
// /v1/operation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationStatusResponse {
    #[serde(flatten)]
    pub snapshot: OperationSnapshot,
    /// Operation currently holding the lock, if any.
    pub lock_holder: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckResponse {
    pub acknowledged: bool,
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// /v1/entities
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityAccepted {
    pub entity_id: String,
}

// ---------------------------------------------------------------------------
// /v1/flash
// ---------------------------------------------------------------------------

/// Uniform runner record for a flash attempt.
pub type FlashResponse = OperationResult<FlashReport>;

// ---------------------------------------------------------------------------
// /v1/restart
// ---------------------------------------------------------------------------

pub type RestartResponse = OperationResult<RestartReport>;
