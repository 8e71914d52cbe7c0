//! Reference UDP loopback carrier.
//!
//! Primarily used for development and testing: each datagram carries one
//! complete protocol message, so no framing or reassembly is needed.

use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::transport::{Carrier, Transport, TransportEvent};
use crate::types::{AuthError, Result};

/// Maximum application payload for the UDP link.
pub const UDP_LINK_MTU: usize = 1024;

/// Poll interval for the receiver thread's shutdown check.
const RX_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Addressing for the UDP carrier.
#[derive(Debug, Clone)]
pub struct UdpParams {
    /// Local address to listen on.
    pub recv_addr: SocketAddr,
    /// Peer address to send datagrams to.
    pub send_addr: SocketAddr,
}

struct UdpLink {
    socket: UdpSocket,
    send_addr: SocketAddr,
}

impl Carrier for UdpLink {
    fn send(&self, data: &[u8]) -> Result<usize> {
        if data.len() > UDP_LINK_MTU {
            return Err(AuthError::InvalidParam("datagram exceeds link MTU"));
        }

        let sent = self.socket.send_to(data, self.send_addr)?;
        debug!(bytes = sent, "sent datagram");
        Ok(sent)
    }

    fn event(&self, event: TransportEvent) {
        // The UDP link is connectionless; lifecycle events carry no meaning.
        debug!(?event, "ignoring transport event");
    }
}

/// UDP datagram carrier bound to a [`Transport`].
///
/// Owns the socket and a receiver thread that forwards incoming datagrams
/// into the transport's receive queue. The thread and socket are released by
/// [`UdpCarrier::shutdown`] or on drop.
pub struct UdpCarrier {
    shutdown: Arc<AtomicBool>,
    local_addr: SocketAddr,
    rx_thread: Option<JoinHandle<()>>,
}

impl UdpCarrier {
    /// Binds the socket, installs the direct send path on `transport`, and
    /// starts the receiver thread.
    pub fn start(transport: Arc<Transport>, params: &UdpParams) -> Result<Self> {
        let socket = UdpSocket::bind(params.recv_addr)?;
        // A finite read timeout lets the receiver observe the shutdown flag.
        socket.set_read_timeout(Some(RX_POLL_INTERVAL))?;
        let local_addr = socket.local_addr()?;

        let link = Arc::new(UdpLink {
            socket: socket.try_clone()?,
            send_addr: params.send_addr,
        });
        transport.attach_carrier(link);

        let shutdown = Arc::new(AtomicBool::new(false));
        let rx_shutdown = shutdown.clone();

        let rx_thread = std::thread::Builder::new()
            .name(format!("udp-rx-{}", local_addr.port()))
            .spawn(move || recv_loop(socket, transport, rx_shutdown))
            .map_err(|e| AuthError::NoResource(format!("failed to spawn receiver: {}", e)))?;

        Ok(Self {
            shutdown,
            local_addr,
            rx_thread: Some(rx_thread),
        })
    }

    /// The bound local address. Useful when binding to port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops the receiver thread and releases the socket.
    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.rx_thread.take() {
            if handle.join().is_err() {
                error!("receiver thread panicked");
            }
        }
    }
}

impl Drop for UdpCarrier {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Receiver loop: reads datagrams off the socket and forwards them to the
/// transport's receive queue.
fn recv_loop(socket: UdpSocket, transport: Arc<Transport>, shutdown: Arc<AtomicBool>) {
    let mut buf = [0u8; UDP_LINK_MTU];

    while !shutdown.load(Ordering::Relaxed) {
        match socket.recv_from(&mut buf) {
            Ok((received, _)) => {
                debug!(bytes = received, "received datagram");
                let accepted = transport.put_recv(&buf[..received]);
                if accepted < received {
                    warn!(
                        dropped = received - accepted,
                        "receive queue full, datagram truncated"
                    );
                }
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                continue;
            }
            Err(e) => {
                error!("socket receive failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn test_start_and_shutdown() {
        let transport = Transport::new(UDP_LINK_MTU);
        let params = UdpParams {
            recv_addr: loopback(0),
            send_addr: loopback(9), // discard port, never written to
        };

        let mut carrier = UdpCarrier::start(transport, &params).unwrap();
        assert_ne!(carrier.local_addr().port(), 0);

        carrier.shutdown();
        // Idempotent.
        carrier.shutdown();
    }

    #[test]
    fn test_datagram_reaches_queue() {
        let transport = Transport::new(UDP_LINK_MTU);
        let params = UdpParams {
            recv_addr: loopback(0),
            send_addr: loopback(9),
        };
        let carrier = UdpCarrier::start(transport.clone(), &params).unwrap();

        let sender = UdpSocket::bind(loopback(0)).unwrap();
        sender.send_to(&[1, 2, 3, 4], carrier.local_addr()).unwrap();

        assert_eq!(
            transport.queued_recv_bytes_wait(Duration::from_secs(2)),
            4
        );

        let mut buf = [0u8; 4];
        transport.recv(&mut buf, Duration::from_secs(1)).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);
    }

    #[test]
    fn test_oversize_send_rejected() {
        let transport = Transport::new(UDP_LINK_MTU);
        let params = UdpParams {
            recv_addr: loopback(0),
            send_addr: loopback(9),
        };
        let _carrier = UdpCarrier::start(transport.clone(), &params).unwrap();

        let result = transport.send(&[0u8; UDP_LINK_MTU + 1]);
        assert!(matches!(result, Err(AuthError::InvalidParam(_))));
    }
}
