//! Wire constants and pure helpers.

use sha2::{Digest, Sha256};

use crate::OtaError;

pub const MAGIC: [u8; 5] = [0x6C, 0x26, 0xF7, 0x5C, 0x45];

pub const OTA_VERSION: u8 = 2;
pub const DEFAULT_PORT: u16 = 3232;
pub const BLOCK_SIZE: usize = 8192;
/// Send buffer requested for the bulk phase.
pub const SEND_BUFFER: u32 = (BLOCK_SIZE * 8) as u32;
pub const NONCE_LEN: usize = 64;
pub const PROGRESS_STEP: u8 = 5;
pub const GZIP_LEVEL: u32 = 9;

pub const FEATURE_COMPRESSION: u8 = 0x01;
pub const FEATURE_SHA256_AUTH: u8 = 0x02;

pub const RESPONSE_OK: u8 = 0x00;
pub const RESPONSE_REQUEST_AUTH: u8 = 0x01;
pub const RESPONSE_REQUEST_SHA256_AUTH: u8 = 0x02;

pub const RESPONSE_HEADER_OK: u8 = 0x40;
pub const RESPONSE_AUTH_OK: u8 = 0x41;
pub const RESPONSE_UPDATE_PREPARE_OK: u8 = 0x42;
pub const RESPONSE_BIN_MD5_OK: u8 = 0x43;
pub const RESPONSE_RECEIVE_OK: u8 = 0x44;
pub const RESPONSE_UPDATE_END_OK: u8 = 0x45;
pub const RESPONSE_SUPPORTS_COMPRESSION: u8 = 0x46;
pub const RESPONSE_CHUNK_OK: u8 = 0x47;

pub const RESPONSE_ERROR_MAGIC: u8 = 0x80;
pub const RESPONSE_ERROR_UPDATE_PREPARE: u8 = 0x81;
pub const RESPONSE_ERROR_AUTH_INVALID: u8 = 0x82;
pub const RESPONSE_ERROR_WRITING_FLASH: u8 = 0x83;
pub const RESPONSE_ERROR_UPDATE_END: u8 = 0x84;
pub const RESPONSE_ERROR_INVALID_BOOTSTRAPPING: u8 = 0x85;
pub const RESPONSE_ERROR_WRONG_CURRENT_FLASH_CONFIG: u8 = 0x86;
pub const RESPONSE_ERROR_WRONG_NEW_FLASH_CONFIG: u8 = 0x87;
pub const RESPONSE_ERROR_ESP8266_NOT_ENOUGH_SPACE: u8 = 0x88;
pub const RESPONSE_ERROR_ESP32_NOT_ENOUGH_SPACE: u8 = 0x89;
pub const RESPONSE_ERROR_NO_UPDATE_PARTITION: u8 = 0x8A;
pub const RESPONSE_ERROR_MD5_MISMATCH: u8 = 0x8B;
pub const RESPONSE_ERROR_UNKNOWN: u8 = 0xFF;

/// Description of a device-reported error code, `None` for non-error bytes.
pub fn device_error_message(code: u8) -> Option<&'static str> {
    Some(match code {
        RESPONSE_ERROR_MAGIC => "Invalid magic byte",
        RESPONSE_ERROR_UPDATE_PREPARE => "Couldn't prepare flash memory for update",
        RESPONSE_ERROR_AUTH_INVALID => "Authentication invalid (wrong OTA password?)",
        RESPONSE_ERROR_WRITING_FLASH => "Writing OTA data to flash memory failed",
        RESPONSE_ERROR_UPDATE_END => "Finishing update failed",
        RESPONSE_ERROR_INVALID_BOOTSTRAPPING => "Please press the reset button on the device",
        RESPONSE_ERROR_WRONG_CURRENT_FLASH_CONFIG => "Device has wrong flash size",
        RESPONSE_ERROR_WRONG_NEW_FLASH_CONFIG => "Device does not have the requested flash size",
        RESPONSE_ERROR_ESP8266_NOT_ENOUGH_SPACE => "ESP8266 not enough space",
        RESPONSE_ERROR_ESP32_NOT_ENOUGH_SPACE => "ESP32 OTA partition too small",
        RESPONSE_ERROR_NO_UPDATE_PARTITION => "OTA partition not found",
        RESPONSE_ERROR_MD5_MISMATCH => "Application MD5 mismatch",
        RESPONSE_ERROR_UNKNOWN => "Unknown error from device",
        _ => return None,
    })
}

/// Fail on a device error code first, then on anything but `expected`.
pub fn check_response(byte: u8, expected: u8, phase: &str) -> Result<(), OtaError> {
    reject_device_error(byte, phase)?;
    if byte != expected {
        return Err(OtaError::Protocol(format!(
            "unexpected response for {phase}: 0x{byte:02X} (expected 0x{expected:02X})"
        )));
    }
    Ok(())
}

pub fn reject_device_error(byte: u8, phase: &str) -> Result<(), OtaError> {
    match device_error_message(byte) {
        Some(message) => Err(OtaError::Device {
            code: byte,
            message,
            phase: phase.to_string(),
        }),
        None => Ok(()),
    }
}

/// Hex `SHA256(secret ‖ nonce ‖ cnonce)`.
pub fn challenge_response(secret: &str, nonce: &str, cnonce: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(nonce.as_bytes());
    hasher.update(cnonce.as_bytes());
    hex::encode(hasher.finalize())
}

/// 32 random bytes as 64 lowercase hex chars.
pub fn generate_cnonce() -> Result<String, OtaError> {
    let mut buf = [0u8; NONCE_LEN / 2];
    getrandom::getrandom(&mut buf).map_err(|e| OtaError::Entropy(e.to_string()))?;
    Ok(hex::encode(buf))
}
