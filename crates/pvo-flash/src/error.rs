use pvo_artifacts::ArtifactError;
use pvo_guard::GuardBlocked;
use pvo_ops::ReasonCode;
use pvo_ota::OtaError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FlashError {
    #[error("Preflight failed: {0}")]
    Guard(#[from] GuardBlocked),

    #[error("Artifact error: {0}")]
    Artifact(#[from] ArtifactError),

    #[error("OTA upload error: {0}")]
    Ota(#[from] OtaError),

    #[error("Cannot resolve IP for device: {0}")]
    DeviceUnresolved(String),

    #[error("flash worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl ReasonCode for FlashError {
    fn reason_code(&self) -> &'static str {
        match self {
            FlashError::Guard(b) => b.reason.as_str(),
            FlashError::Artifact(e) => e.reason_code(),
            FlashError::Ota(e) => e.reason_code(),
            FlashError::DeviceUnresolved(_) => "device_unresolved",
            FlashError::Join(_) => "flash_task_failed",
        }
    }
}
