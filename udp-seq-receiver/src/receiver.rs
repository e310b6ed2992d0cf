use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;
use tracing::{info, warn};

use crate::error::RxError;

/// Receive buffer large enough for any UDP datagram, so oversized ones are
/// measured rather than truncated to the expected size.
pub const RECV_BUFFER_SIZE: usize = 65536;

/// Something that hands out one datagram per call.
pub trait DatagramSource {
    /// Block until a datagram arrives and copy it into `buf`. Returns its
    /// length. A configured timeout surfaces as `WouldBlock` or `TimedOut`.
    fn recv_datagram(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Bound UDP socket with the receive buffer sized for high rate links.
#[derive(Debug)]
pub struct UdpReceiver {
    socket: UdpSocket,
}

impl UdpReceiver {
    pub fn bind(
        addr: SocketAddr,
        buffer_size: usize,
        timeout: Option<Duration>,
    ) -> Result<Self, RxError> {
        let domain = if addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
        let socket =
            Socket::new(domain, Type::DGRAM, Some(Protocol::UDP)).map_err(RxError::Socket)?;

        socket.set_reuse_address(true).map_err(RxError::Socket)?;

        if let Err(e) = socket.set_recv_buffer_size(buffer_size) {
            warn!("Failed to set receive buffer to {} bytes: {}", buffer_size, e);
        }
        if let Err(e) = socket.set_send_buffer_size(buffer_size) {
            warn!("Failed to set send buffer to {} bytes: {}", buffer_size, e);
        }

        if let Some(timeout) = timeout {
            socket.set_read_timeout(Some(timeout)).map_err(RxError::Socket)?;
        }

        socket.bind(&addr.into()).map_err(RxError::Socket)?;

        let rx = socket.recv_buffer_size().map_err(RxError::Socket)?;
        let tx = socket.send_buffer_size().map_err(RxError::Socket)?;
        info!("Socket buffer sizes: rx {} bytes, tx {} bytes", rx, tx);

        let socket: UdpSocket = socket.into();
        info!("Listening on UDP {}", socket.local_addr().map_err(RxError::Socket)?);
        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl DatagramSource for UdpReceiver {
    fn recv_datagram(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.socket.recv(buf)
    }
}

/// Timeouts on a blocking socket come back as one of these two kinds.
pub fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}
