use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::{lookup_host, TcpSocket, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::protocol::{DEFAULT_PORT, SEND_BUFFER};
use crate::session::compress;
use crate::{AuthMode, OtaError, OtaLink, OtaSession, TimeoutPhase};

/// Capacity of the progress channel returned by [`OtaClient::spawn_upload`].
/// Progress arrives in 5-point steps, so at most ~21 values per upload.
const PROGRESS_CHANNEL: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtaSettings {
    pub port: u16,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub overall_timeout: Duration,
}

impl Default for OtaSettings {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            connect_timeout: Duration::from_secs(20),
            read_timeout: Duration::from_secs(90),
            overall_timeout: Duration::from_secs(120),
        }
    }
}

/// What a successful upload negotiated and sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReport {
    pub negotiated_version: u8,
    pub compressed: bool,
    pub auth: AuthMode,
    pub firmware_bytes: u64,
    pub payload_bytes: u64,
}

/// Running upload: the task's result plus its progress stream (0-100).
pub struct UploadHandle {
    pub task: JoinHandle<Result<UploadReport, OtaError>>,
    pub progress: mpsc::Receiver<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct OtaClient {
    settings: OtaSettings,
}

impl OtaClient {
    pub fn new(settings: OtaSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &OtaSettings {
        &self.settings
    }

    /// Resolve `host` and connect with the enlarged send buffer set before
    /// the handshake.
    pub async fn connect(&self, host: &str) -> Result<TcpStream, OtaError> {
        let port = self.settings.port;
        let fut = async {
            let addr: SocketAddr = lookup_host((host, port))
                .await
                .map_err(|e| OtaError::io(format!("resolve {host}"), e))?
                .next()
                .ok_or_else(|| OtaError::Protocol(format!("no address for host {host}")))?;

            let socket = if addr.is_ipv4() {
                TcpSocket::new_v4()
            } else {
                TcpSocket::new_v6()
            }
            .map_err(|e| OtaError::io("create socket", e))?;
            if let Err(e) = socket.set_send_buffer_size(SEND_BUFFER) {
                warn!(error = %e, "could not enlarge send buffer");
            }
            let stream = socket
                .connect(addr)
                .await
                .map_err(|e| OtaError::io(format!("connect {addr}"), e))?;
            Ok::<_, OtaError>(stream)
        };

        let stream = tokio::time::timeout(self.settings.connect_timeout, fut)
            .await
            .map_err(|_| OtaError::Timeout {
                phase: TimeoutPhase::Connect,
            })??;
        info!(host = %host, port, "connected to device");
        Ok(stream)
    }

    /// Connect and upload. The overall timeout covers both; connecting is
    /// additionally bounded by the connect timeout.
    pub async fn upload(
        &self,
        host: &str,
        firmware: &[u8],
        secret: Option<&str>,
        progress: Option<&mpsc::Sender<u8>>,
    ) -> Result<UploadReport, OtaError> {
        info!(host = %host, port = self.settings.port, bytes = firmware.len(), "OTA upload starting");
        let deadline = Instant::now() + self.settings.overall_timeout;
        let stream = tokio::time::timeout_at(deadline, self.connect(host))
            .await
            .map_err(|_| OtaError::Timeout {
                phase: TimeoutPhase::Overall,
            })??;
        let report = self
            .upload_until(stream, firmware, secret, progress, deadline)
            .await?;
        info!(
            host = %host,
            payload_bytes = report.payload_bytes,
            compressed = report.compressed,
            "OTA upload complete"
        );
        Ok(report)
    }

    /// Run the full exchange over an already-open link, bounded by the
    /// overall timeout. The link is closed on every exit path, including
    /// the overall deadline.
    pub async fn upload_over<L: OtaLink>(
        &self,
        link: L,
        firmware: &[u8],
        secret: Option<&str>,
        progress: Option<&mpsc::Sender<u8>>,
    ) -> Result<UploadReport, OtaError> {
        let deadline = Instant::now() + self.settings.overall_timeout;
        self.upload_until(link, firmware, secret, progress, deadline)
            .await
    }

    async fn upload_until<L: OtaLink>(
        &self,
        link: L,
        firmware: &[u8],
        secret: Option<&str>,
        progress: Option<&mpsc::Sender<u8>>,
        deadline: Instant,
    ) -> Result<UploadReport, OtaError> {
        if firmware.is_empty() {
            return Err(OtaError::Protocol("firmware payload is empty".to_string()));
        }
        let mut session = OtaSession::new(link, self.settings.read_timeout);
        let exchanged =
            tokio::time::timeout_at(deadline, exchange(&mut session, firmware, secret, progress))
                .await;
        let result = match exchanged {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    sent = session.bytes_transferred(),
                    "overall upload deadline reached, closing link"
                );
                Err(OtaError::Timeout {
                    phase: TimeoutPhase::Overall,
                })
            }
        };
        session.close().await;
        result
    }

    /// Spawn [`upload`](Self::upload) on its own task.
    pub fn spawn_upload(
        &self,
        host: String,
        firmware: Vec<u8>,
        secret: Option<String>,
    ) -> UploadHandle {
        let (tx, rx) = mpsc::channel(PROGRESS_CHANNEL);
        let client = self.clone();
        let task = tokio::spawn(async move {
            client
                .upload(&host, &firmware, secret.as_deref(), Some(&tx))
                .await
        });
        UploadHandle { task, progress: rx }
    }
}

async fn exchange<L: OtaLink>(
    session: &mut OtaSession<L>,
    firmware: &[u8],
    secret: Option<&str>,
    progress: Option<&mpsc::Sender<u8>>,
) -> Result<UploadReport, OtaError> {
    let version = session.handshake().await?;
    let compressed = session.negotiate_features().await?;

    let packed;
    let payload: &[u8] = if compressed {
        // gzip of a full image is CPU-bound; keep it off the runtime threads.
        let raw = firmware.to_vec();
        packed = tokio::task::spawn_blocking(move || compress(&raw))
            .await
            .map_err(|e| OtaError::Protocol(format!("compression task failed: {e}")))??;
        info!(raw = firmware.len(), compressed = packed.len(), "payload compressed");
        &packed
    } else {
        firmware
    };

    let auth = session.authenticate(secret).await?;
    session.prepare(payload).await?;
    session.transfer(payload, progress).await?;
    session.finalize().await?;

    Ok(UploadReport {
        negotiated_version: version,
        compressed,
        auth,
        firmware_bytes: firmware.len() as u64,
        payload_bytes: session.bytes_transferred(),
    })
}
