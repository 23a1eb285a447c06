//! One protocol exchange over an established link.

use std::io::Write;
use std::time::Duration;

use flate2::write::GzEncoder;
use flate2::Compression;
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::protocol::{self, *};
use crate::{OtaError, OtaLink, TimeoutPhase};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    None,
    Sha256,
}

/// State of a single upload attempt. Created per attempt and consumed by
/// [`OtaSession::close`]; never reused.
pub struct OtaSession<L: OtaLink> {
    link: L,
    read_timeout: Duration,
    negotiated_version: Option<u8>,
    compression: bool,
    auth_mode: Option<AuthMode>,
    bytes_transferred: u64,
}

impl<L: OtaLink> OtaSession<L> {
    pub fn new(link: L, read_timeout: Duration) -> Self {
        Self {
            link,
            read_timeout,
            negotiated_version: None,
            compression: false,
            auth_mode: None,
            bytes_transferred: 0,
        }
    }

    pub fn negotiated_version(&self) -> Option<u8> {
        self.negotiated_version
    }

    pub fn compression_enabled(&self) -> bool {
        self.compression
    }

    pub fn auth_mode(&self) -> Option<AuthMode> {
        self.auth_mode
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred
    }

    // -----------------------------------------------------------------------
    // I/O primitives
    // -----------------------------------------------------------------------

    async fn recv_exact(&mut self, n: usize, what: &str) -> Result<Vec<u8>, OtaError> {
        let mut buf = vec![0u8; n];
        match tokio::time::timeout(self.read_timeout, self.link.read_exact(&mut buf)).await {
            Err(_) => Err(OtaError::Timeout {
                phase: TimeoutPhase::Read(what.to_string()),
            }),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                Err(OtaError::ConnectionClosed {
                    what: what.to_string(),
                })
            }
            Ok(Err(e)) => Err(OtaError::io(format!("read {what}"), e)),
            Ok(Ok(_)) => Ok(buf),
        }
    }

    async fn recv_byte(&mut self, what: &str) -> Result<u8, OtaError> {
        Ok(self.recv_exact(1, what).await?[0])
    }

    async fn send(&mut self, bytes: &[u8], what: &str) -> Result<(), OtaError> {
        self.link
            .write_all(bytes)
            .await
            .map_err(|e| OtaError::io(format!("write {what}"), e))?;
        self.link
            .flush()
            .await
            .map_err(|e| OtaError::io(format!("flush {what}"), e))
    }

    fn low_latency(&mut self, on: bool) {
        if let Err(e) = self.link.set_low_latency(on) {
            warn!(on, error = %e, "could not toggle low-latency mode");
        }
    }

    // -----------------------------------------------------------------------
    // Protocol phases
    // -----------------------------------------------------------------------

    /// Magic, then `[OK, version]`. Only [`OTA_VERSION`] is accepted.
    pub async fn handshake(&mut self) -> Result<u8, OtaError> {
        self.low_latency(true);
        self.send(&MAGIC, "magic").await?;

        let resp = self.recv_exact(2, "version").await?;
        check_response(resp[0], RESPONSE_OK, "magic response")?;
        let version = resp[1];
        debug!(version, "device OTA version");
        if version != OTA_VERSION {
            return Err(OtaError::Protocol(format!(
                "unsupported OTA version: {version} (require {OTA_VERSION})"
            )));
        }
        self.negotiated_version = Some(version);
        Ok(version)
    }

    /// Offer compression and SHA-256 auth; returns whether the device
    /// accepts compressed payloads.
    pub async fn negotiate_features(&mut self) -> Result<bool, OtaError> {
        self.send(&[FEATURE_COMPRESSION | FEATURE_SHA256_AUTH], "features")
            .await?;
        let resp = self.recv_byte("features").await?;
        reject_device_error(resp, "features")?;
        self.compression = resp == RESPONSE_SUPPORTS_COMPRESSION;
        debug!(compression = self.compression, "features negotiated");
        Ok(self.compression)
    }

    /// Answer the device's auth request. The legacy MD5 mode is always
    /// refused before any nonce is exchanged.
    pub async fn authenticate(&mut self, secret: Option<&str>) -> Result<AuthMode, OtaError> {
        let kind = self.recv_byte("auth type").await?;
        reject_device_error(kind, "auth type")?;

        let mode = match kind {
            RESPONSE_AUTH_OK => {
                debug!("device requires no authentication");
                AuthMode::None
            }
            RESPONSE_REQUEST_SHA256_AUTH => {
                let Some(secret) = secret else {
                    return Err(OtaError::Protocol(
                        "device requires an OTA password, but none was provided".to_string(),
                    ));
                };
                let raw = self.recv_exact(NONCE_LEN, "SHA256 nonce").await?;
                let nonce = String::from_utf8(raw)
                    .ok()
                    .filter(|s| s.is_ascii())
                    .ok_or_else(|| OtaError::Protocol("device nonce is not ASCII".to_string()))?;

                let cnonce = protocol::generate_cnonce()?;
                self.send(cnonce.as_bytes(), "cnonce").await?;
                let response = challenge_response(secret, &nonce, &cnonce);
                self.send(response.as_bytes(), "auth response").await?;

                let ok = self.recv_byte("auth result").await?;
                check_response(ok, RESPONSE_AUTH_OK, "SHA256 authentication")?;
                info!("SHA256 authentication successful");
                AuthMode::Sha256
            }
            RESPONSE_REQUEST_AUTH => {
                return Err(OtaError::Protocol(
                    "device requested legacy MD5 auth - refused (SHA256 required)".to_string(),
                ));
            }
            other => {
                return Err(OtaError::Protocol(format!(
                    "unknown auth type from device: 0x{other:02X}"
                )));
            }
        };
        self.auth_mode = Some(mode);
        Ok(mode)
    }

    /// Announce size and MD5 of the final payload.
    pub async fn prepare(&mut self, payload: &[u8]) -> Result<(), OtaError> {
        self.low_latency(false);

        let size = u32::try_from(payload.len()).map_err(|_| {
            OtaError::Protocol(format!("payload of {} bytes exceeds 4-byte size field", payload.len()))
        })?;
        self.send(&size.to_be_bytes(), "size").await?;
        let resp = self.recv_byte("update prepare").await?;
        check_response(resp, RESPONSE_UPDATE_PREPARE_OK, "update prepare")?;

        let md5 = hex::encode(Md5::digest(payload));
        self.send(md5.as_bytes(), "binary MD5").await?;
        let resp = self.recv_byte("binary MD5").await?;
        check_response(resp, RESPONSE_BIN_MD5_OK, "binary MD5 check")?;
        Ok(())
    }

    /// Send `payload` in [`BLOCK_SIZE`] blocks, awaiting one ack per block
    /// before the next one leaves.
    pub async fn transfer(
        &mut self,
        payload: &[u8],
        progress: Option<&mpsc::Sender<u8>>,
    ) -> Result<(), OtaError> {
        let total = payload.len();
        info!(bytes = total, block = BLOCK_SIZE, "uploading");
        let mut offset = 0usize;
        let mut last_reported: i16 = -1;

        for chunk in payload.chunks(BLOCK_SIZE) {
            let label = format!("chunk@{}", offset + chunk.len());
            self.send(chunk, &label).await?;
            offset += chunk.len();
            self.bytes_transferred = offset as u64;

            let ack = self.recv_byte(&label).await?;
            check_response(ack, RESPONSE_CHUNK_OK, &label)?;

            let pct = (offset * 100 / total) as i16;
            let done = offset == total;
            if pct >= last_reported + i16::from(PROGRESS_STEP) || (done && pct != last_reported) {
                last_reported = pct;
                if let Some(tx) = progress {
                    // A dropped receiver only means nobody is watching.
                    let _ = tx.send(pct as u8).await;
                }
            }
        }
        Ok(())
    }

    /// Collect the final acks and release the device to reboot.
    pub async fn finalize(&mut self) -> Result<(), OtaError> {
        self.low_latency(true);
        let resp = self.recv_byte("receive OK").await?;
        check_response(resp, RESPONSE_RECEIVE_OK, "receive complete")?;
        let resp = self.recv_byte("update end").await?;
        check_response(resp, RESPONSE_UPDATE_END_OK, "update end")?;
        self.send(&[RESPONSE_OK], "final ack").await
    }

    /// Best-effort shutdown. The device may already be rebooting, so errors
    /// are logged at debug and dropped.
    pub async fn close(mut self) {
        match tokio::time::timeout(Duration::from_secs(2), self.link.shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(error = %e, "ignoring error while closing OTA link"),
            Err(_) => debug!("OTA link close timed out"),
        }
    }
}

/// gzip at the protocol's fixed level.
pub(crate) fn compress(data: &[u8]) -> Result<Vec<u8>, OtaError> {
    let mut enc = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::new(GZIP_LEVEL));
    enc.write_all(data)
        .map_err(|e| OtaError::io("compress payload", e))?;
    enc.finish().map_err(|e| OtaError::io("compress payload", e))
}
