//! Minimal UDP socket wrapper for the TWP transport.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::time::Duration;

use super::error::Result;

/// Binding for a UDP socket.
///
/// The socket runs in blocking mode with a read timeout so the engine's poll
/// wait is bounded and cancellable between iterations.
#[derive(Debug, Clone)]
pub struct SocketBinding {
    socket: Arc<UdpSocket>,
}

impl SocketBinding {
    /// Bind to the provided address.
    pub fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(false)?;
        Ok(Self {
            socket: Arc::new(socket),
        })
    }

    /// Set the bounded poll wait; `None` blocks indefinitely.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.socket.set_read_timeout(timeout)?;
        Ok(())
    }

    /// Adjust the non-blocking mode.
    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
        self.socket.set_nonblocking(nonblocking)?;
        Ok(())
    }

    /// Send bytes to a remote address.
    pub fn send_to(&self, buf: &[u8], addr: SocketAddr) -> Result<usize> {
        Ok(self.socket.send_to(buf, addr)?)
    }

    /// Receive bytes into the provided buffer; `None` when the wait timed
    /// out or nothing is queued.
    pub fn recv_from(&self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>> {
        match self.socket.recv_from(buf) {
            Ok((len, addr)) => Ok(Some((len, addr))),
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                ) =>
            {
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Access the local address for this binding.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}
