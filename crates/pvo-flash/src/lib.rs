//! pvo-flash
//!
//! End-to-end firmware flash for one device:
//!
//! `init(0) -> preflight(10) -> download(30) -> verify(50) -> upload(30..80)
//! -> postcheck(85..95) -> complete(100)`, or `failed(0)` from any stage.
//!
//! Every transition is published as a [`FlashStageEvent`] on
//! [`pvo_host::topics::FLASH_STAGE`] and mirrored to the operation's progress
//! handle when one is supplied. The artifact workspace lives exactly as long
//! as one [`FlashPipeline::run`] call.
//!
//! Post-upload reboot confirmation ([`RebootMonitor`]) is advisory: an
//! inconclusive result is logged and the flash still completes.
//!
//! [`DeviceRestart`] is the second maintenance action: restart command plus
//! the same reboot watch, run under the same operation lock.

mod error;
mod monitor;
mod pipeline;
mod restart;
mod stage;

pub use error::FlashError;
pub use monitor::{MonitorPlan, MonitorSettings, RebootEvidence, RebootMonitor, RebootOutcome};
pub use pipeline::{FlashPipeline, FlashReport, FlashRequest, OPERATION_NAME};
pub use restart::{
    DeviceRestart, RestartError, RestartReport, RestartRequest, RestartStatus, RESTART_OPERATION,
};
pub use stage::{FlashStage, FlashStageEvent};
