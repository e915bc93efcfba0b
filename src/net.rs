use std::net::{SocketAddr, UdpSocket};

use tokio::sync::watch;

use crate::settings::{Toggles, UDP_CHUNK_SIZE};

/// Fire-and-forget UDP fanout for receivers on the local segment.
///
/// Payloads larger than one datagram are split into transport-friendly
/// chunks. Sends are best effort; a failed datagram is dropped, never
/// retried, and never fails the caller. With the broadcast toggle off
/// every call is a no-op.
pub struct BroadcastSink {
    socket: UdpSocket,
    dest: SocketAddr,
    toggles: watch::Receiver<Toggles>,
}

impl BroadcastSink {
    pub fn new(dest: SocketAddr, toggles: watch::Receiver<Toggles>) -> std::io::Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.set_broadcast(true)?;
        Ok(Self {
            socket,
            dest,
            toggles,
        })
    }

    pub fn destination(&self) -> SocketAddr {
        self.dest
    }

    pub fn send(&self, payload: &[u8]) {
        if !self.toggles.borrow().broadcast || payload.is_empty() {
            return;
        }
        for chunk in payload.chunks(UDP_CHUNK_SIZE) {
            if let Err(e) = self.socket.send_to(chunk, self.dest) {
                log::trace!("udp send to {} failed: {}", self.dest, e);
            }
        }
    }
}
