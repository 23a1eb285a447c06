use std::io;

use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};
use tokio::net::TcpStream;

/// Byte stream the engine talks over.
///
/// `set_low_latency(true)` disables send coalescing for the small
/// request/response exchanges; `false` re-enables it for bulk transfer.
pub trait OtaLink: AsyncRead + AsyncWrite + Unpin + Send {
    fn set_low_latency(&mut self, on: bool) -> io::Result<()>;
}

impl OtaLink for TcpStream {
    fn set_low_latency(&mut self, on: bool) -> io::Result<()> {
        self.set_nodelay(on)
    }
}

/// In-memory pipe; there is nothing to tune.
impl OtaLink for DuplexStream {
    fn set_low_latency(&mut self, _on: bool) -> io::Result<()> {
        Ok(())
    }
}
