use std::fmt;
use std::io;

use thiserror::Error;

/// Which independent timeout expired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeoutPhase {
    Connect,
    /// A single read, labelled with what was being read.
    Read(String),
    Overall,
}

impl fmt::Display for TimeoutPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutPhase::Connect => write!(f, "connect"),
            TimeoutPhase::Read(what) => write!(f, "read {what}"),
            TimeoutPhase::Overall => write!(f, "overall upload"),
        }
    }
}

#[derive(Debug, Error)]
pub enum OtaError {
    /// The device answered with one of its error codes.
    #[error("OTA error ({phase}): {message} [0x{code:02X}]")]
    Device {
        code: u8,
        message: &'static str,
        phase: String,
    },

    /// Local validation failed: unexpected byte, unsupported version, refused
    /// auth mode, missing credential.
    #[error("OTA protocol error: {0}")]
    Protocol(String),

    #[error("OTA timeout during {phase}")]
    Timeout { phase: TimeoutPhase },

    #[error("Connection closed while reading {what}")]
    ConnectionClosed { what: String },

    #[error("Network error during {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("no entropy for client nonce: {0}")]
    Entropy(String),
}

impl OtaError {
    pub fn reason_code(&self) -> &'static str {
        match self {
            OtaError::Device { .. } | OtaError::Protocol(_) => "ota_protocol",
            OtaError::Timeout { .. } => "ota_timeout",
            OtaError::ConnectionClosed { .. } | OtaError::Io { .. } | OtaError::Entropy(_) => {
                "ota_transport"
            }
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, OtaError::Timeout { .. })
    }

    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        OtaError::Io {
            context: context.into(),
            source,
        }
    }
}
