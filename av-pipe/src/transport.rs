use std::net::{SocketAddr, TcpListener, TcpStream};
use std::time::Duration;

use anyhow::Context as _;
use tokio_util::sync::CancellationToken;

/// How long a blocking read on the accepted connection may stall before the
/// AVIO callback gets a chance to observe cancellation.
pub const READ_TIMEOUT: Duration = Duration::from_millis(500);

const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// Loopback byte transport the external encoder process connects to.
/// One client at a time; the demuxer consumes the accepted connection.
pub struct Transport {
    listener: TcpListener,
}

impl Transport {
    pub fn bind(addr: &str) -> anyhow::Result<Self> {
        let listener =
            TcpListener::bind(addr).with_context(|| format!("bind byte transport on {}", addr))?;
        listener.set_nonblocking(true)?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Blocks until an encoder connects, polling for cancellation in between.
    pub fn wait_for_client(&self, cancel: &CancellationToken) -> anyhow::Result<TcpStream> {
        loop {
            if cancel.is_cancelled() {
                anyhow::bail!("cancelled while waiting for encoder connection");
            }
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    log::info!("encoder connected from {}", peer);
                    stream.set_nonblocking(false)?;
                    stream.set_read_timeout(Some(READ_TIMEOUT))?;
                    let _ = stream.set_nodelay(true);
                    return Ok(stream);
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(ACCEPT_POLL);
                }
                Err(e) => return Err(e).context("accept on byte transport"),
            }
        }
    }
}
