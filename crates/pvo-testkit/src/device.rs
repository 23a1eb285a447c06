use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use md5::{Digest, Md5};
use pvo_ota::protocol::*;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::debug;

/// Fixed device nonce (64 ASCII hex chars).
const DEVICE_NONCE: &str = "5e0f1c2a3b4d6e7f8091a2b3c4d5e6f708192a3b4c5d6e7f8091a2b3c4d5e6f7";

/// How long the device waits after a chunk to see whether the client sent
/// more before the ack.
const PIPELINE_PEEK: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceAuth {
    None,
    Sha256 { password: String },
    /// Legacy MD5 request (0x01).
    LegacyMd5,
    /// Any other raw auth byte.
    Raw(u8),
}

/// Point in the exchange where a fault can be injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Version,
    Features,
    Auth,
    Prepare,
    Md5,
    /// Zero-based chunk index.
    Chunk(usize),
    ReceiveOk,
    UpdateEnd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Answer with this byte instead of the normal response, then stop.
    Reply(u8),
    /// Go silent and keep the connection open until the client gives up.
    Stall,
    /// Drop the connection.
    Hangup,
}

/// Everything the device observed.
#[derive(Debug, Clone, Default)]
pub struct DeviceLog {
    pub magic_ok: bool,
    pub features_offer: Option<u8>,
    pub cnonce: Option<String>,
    pub auth_response: Option<String>,
    pub declared_size: Option<u32>,
    pub declared_md5: Option<String>,
    pub chunks: usize,
    /// Client sent bytes past a chunk before that chunk was acknowledged.
    pub pipelined: bool,
    pub payload: Vec<u8>,
    pub final_ack: Option<u8>,
    /// Bytes received after the device stopped following the protocol.
    pub trailing: Vec<u8>,
}

impl DeviceLog {
    /// Received payload, gunzipped when it was sent compressed.
    pub fn firmware_image(&self) -> Vec<u8> {
        if self.payload.starts_with(&[0x1f, 0x8b]) {
            let mut out = Vec::new();
            let mut dec = flate2::read::GzDecoder::new(self.payload.as_slice());
            if std::io::Read::read_to_end(&mut dec, &mut out).is_ok() {
                return out;
            }
        }
        self.payload.clone()
    }

    pub fn completed(&self) -> bool {
        self.final_ack == Some(RESPONSE_OK)
    }
}

enum Outcome {
    Completed,
    /// Stopped following the protocol; drain until the client closes.
    Stopped,
    /// Drop the connection immediately.
    Hangup,
}

/// Scripted OTA device. Serves exactly one connection.
pub struct FakeDevice {
    version: u8,
    compression: bool,
    auth: DeviceAuth,
    fault: Option<(Phase, Fault)>,
    on_reboot: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Default for FakeDevice {
    fn default() -> Self {
        Self {
            version: OTA_VERSION,
            compression: true,
            auth: DeviceAuth::None,
            fault: None,
            on_reboot: None,
        }
    }
}

impl FakeDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn version(mut self, v: u8) -> Self {
        self.version = v;
        self
    }

    pub fn compression(mut self, on: bool) -> Self {
        self.compression = on;
        self
    }

    pub fn auth(mut self, auth: DeviceAuth) -> Self {
        self.auth = auth;
        self
    }

    pub fn fault(mut self, phase: Phase, fault: Fault) -> Self {
        self.fault = Some((phase, fault));
        self
    }

    /// Run after the client's final ack, e.g. to reset an uptime entity.
    pub fn on_reboot(mut self, f: impl FnOnce() + Send + Sync + 'static) -> Self {
        self.on_reboot = Some(Box::new(f));
        self
    }

    /// Listen on an ephemeral loopback port and serve the first connection.
    pub async fn spawn_tcp(self) -> io::Result<(SocketAddr, JoinHandle<DeviceLog>)> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let handle = tokio::spawn(async move {
            match listener.accept().await {
                Ok((stream, _)) => self.serve(stream).await,
                Err(_) => DeviceLog::default(),
            }
        });
        Ok((addr, handle))
    }

    /// Serve over an in-memory pipe; the returned half goes to the client.
    pub fn spawn_duplex(self) -> (DuplexStream, JoinHandle<DeviceLog>) {
        let (client, device) = tokio::io::duplex(64 * 1024);
        let handle = tokio::spawn(self.serve(device));
        (client, handle)
    }

    pub async fn serve<S>(mut self, mut stream: S) -> DeviceLog
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut log = DeviceLog::default();
        match self.run(&mut stream, &mut log).await {
            Ok(Outcome::Completed) => {
                if let Some(f) = self.on_reboot.take() {
                    f();
                }
            }
            Ok(Outcome::Stopped) => {
                // Collect whatever the client still sends until it closes.
                let _ = stream.read_to_end(&mut log.trailing).await;
            }
            Ok(Outcome::Hangup) => debug!("fake device hung up"),
            Err(e) => debug!(error = %e, "fake device stream error"),
        }
        log
    }

    fn fault_at(&self, phase: Phase) -> Option<Fault> {
        match self.fault {
            Some((p, f)) if p == phase => Some(f),
            _ => None,
        }
    }

    /// Send the normal reply unless a fault is scripted. `Some(outcome)`
    /// ends the exchange.
    async fn respond<S>(&self, s: &mut S, phase: Phase, normal: &[u8]) -> io::Result<Option<Outcome>>
    where
        S: AsyncWrite + Unpin,
    {
        match self.fault_at(phase) {
            None => {
                s.write_all(normal).await?;
                s.flush().await?;
                Ok(None)
            }
            Some(Fault::Reply(code)) => {
                let mut out = normal.to_vec();
                out[0] = code;
                s.write_all(&out).await?;
                s.flush().await?;
                Ok(Some(Outcome::Stopped))
            }
            Some(Fault::Stall) => Ok(Some(Outcome::Stopped)),
            Some(Fault::Hangup) => Ok(Some(Outcome::Hangup)),
        }
    }

    async fn run<S>(&mut self, s: &mut S, log: &mut DeviceLog) -> io::Result<Outcome>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut magic = [0u8; 5];
        s.read_exact(&mut magic).await?;
        log.magic_ok = magic == MAGIC;
        if !log.magic_ok {
            s.write_all(&[RESPONSE_ERROR_MAGIC, 0]).await?;
            return Ok(Outcome::Stopped);
        }
        if let Some(end) = self.respond(s, Phase::Version, &[RESPONSE_OK, self.version]).await? {
            return Ok(end);
        }
        if self.version != OTA_VERSION {
            return Ok(Outcome::Stopped);
        }

        let offer = s.read_u8().await?;
        log.features_offer = Some(offer);
        let accept = if self.compression && offer & FEATURE_COMPRESSION != 0 {
            RESPONSE_SUPPORTS_COMPRESSION
        } else {
            RESPONSE_HEADER_OK
        };
        if let Some(end) = self.respond(s, Phase::Features, &[accept]).await? {
            return Ok(end);
        }

        let auth_byte = match &self.auth {
            DeviceAuth::None => RESPONSE_AUTH_OK,
            DeviceAuth::Sha256 { .. } => RESPONSE_REQUEST_SHA256_AUTH,
            DeviceAuth::LegacyMd5 => RESPONSE_REQUEST_AUTH,
            DeviceAuth::Raw(b) => *b,
        };
        if let Some(end) = self.respond(s, Phase::Auth, &[auth_byte]).await? {
            return Ok(end);
        }
        match self.auth.clone() {
            DeviceAuth::None => {}
            DeviceAuth::Sha256 { password } => {
                s.write_all(DEVICE_NONCE.as_bytes()).await?;
                s.flush().await?;
                let mut cnonce = [0u8; NONCE_LEN];
                s.read_exact(&mut cnonce).await?;
                let mut response = [0u8; 64];
                s.read_exact(&mut response).await?;
                let cnonce = String::from_utf8_lossy(&cnonce).to_string();
                let response = String::from_utf8_lossy(&response).to_string();
                let ok = response == challenge_response(&password, DEVICE_NONCE, &cnonce);
                log.cnonce = Some(cnonce);
                log.auth_response = Some(response);
                if !ok {
                    s.write_all(&[RESPONSE_ERROR_AUTH_INVALID]).await?;
                    return Ok(Outcome::Stopped);
                }
                s.write_all(&[RESPONSE_AUTH_OK]).await?;
                s.flush().await?;
            }
            DeviceAuth::LegacyMd5 | DeviceAuth::Raw(_) => return Ok(Outcome::Stopped),
        }

        let size = s.read_u32().await?;
        log.declared_size = Some(size);
        if let Some(end) = self.respond(s, Phase::Prepare, &[RESPONSE_UPDATE_PREPARE_OK]).await? {
            return Ok(end);
        }
        let mut md5 = [0u8; 32];
        s.read_exact(&mut md5).await?;
        log.declared_md5 = Some(String::from_utf8_lossy(&md5).to_string());
        if let Some(end) = self.respond(s, Phase::Md5, &[RESPONSE_BIN_MD5_OK]).await? {
            return Ok(end);
        }

        let mut remaining = size as usize;
        let mut index = 0usize;
        while remaining > 0 {
            let n = remaining.min(BLOCK_SIZE);
            let mut chunk = vec![0u8; n];
            s.read_exact(&mut chunk).await?;
            log.payload.extend_from_slice(&chunk);
            remaining -= n;
            log.chunks += 1;

            let mut peek = [0u8; 1];
            if let Ok(Ok(got)) = tokio::time::timeout(PIPELINE_PEEK, s.read(&mut peek)).await {
                if got > 0 {
                    log.pipelined = true;
                    log.payload.push(peek[0]);
                    remaining = remaining.saturating_sub(1);
                }
            }

            if let Some(end) = self.respond(s, Phase::Chunk(index), &[RESPONSE_CHUNK_OK]).await? {
                return Ok(end);
            }
            index += 1;
        }

        let actual_md5 = hex::encode(Md5::digest(&log.payload));
        let receive = if Some(actual_md5) == log.declared_md5 {
            RESPONSE_RECEIVE_OK
        } else {
            RESPONSE_ERROR_MD5_MISMATCH
        };
        if let Some(end) = self.respond(s, Phase::ReceiveOk, &[receive]).await? {
            return Ok(end);
        }
        if receive != RESPONSE_RECEIVE_OK {
            return Ok(Outcome::Stopped);
        }
        if let Some(end) = self.respond(s, Phase::UpdateEnd, &[RESPONSE_UPDATE_END_OK]).await? {
            return Ok(end);
        }

        log.final_ack = Some(s.read_u8().await?);
        Ok(if log.completed() {
            Outcome::Completed
        } else {
            Outcome::Stopped
        })
    }
}
