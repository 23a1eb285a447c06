//! pvo-ota
//!
//! Client side of the device OTA protocol (version 2): handshake, feature
//! negotiation, SHA-256 challenge authentication, size and MD5 preparation,
//! chunked transfer with one acknowledgement per chunk, and finalization.
//!
//! The engine never retries within an attempt. Connect, per-read and overall
//! timeouts each surface as [`OtaError::Timeout`] with the phase that expired,
//! distinct from device rejections ([`OtaError::Device`]) and local protocol
//! validation failures ([`OtaError::Protocol`]).
//!
//! [`OtaClient::spawn_upload`] runs a transfer on its own task and streams
//! progress over a bounded channel.

mod client;
mod error;
mod link;
pub mod protocol;
mod session;

pub use client::{OtaClient, OtaSettings, UploadHandle, UploadReport};
pub use error::{OtaError, TimeoutPhase};
pub use link::OtaLink;
pub use protocol::challenge_response;
pub use session::{AuthMode, OtaSession};
