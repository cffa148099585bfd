//! Datagram peer adapter
//!
//! Wraps a UDP socket and tracks the single "active endpoint" that outgoing
//! datagrams are sent to. Every successful receive replaces the active
//! endpoint with the sender of that datagram, so replies always go to the
//! most recent sender. There is no peer authentication at this layer.
//!
//! Two modes:
//! - **client**: the socket is `connect`ed to the target, which also makes
//!   the OS drop datagrams from other sources;
//! - **listener**: the socket is only bound. The active endpoint comes from
//!   the first receive or from [`UdpPeer::soft_connect`], and the socket keeps
//!   accepting datagrams from any source.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use parking_lot::Mutex;
use tokio::io::ReadBuf;
use tokio::net::UdpSocket;
use tracing::{debug, trace};

use crate::common::{ConnectInfo, Result};
use crate::metrics::{UDP_DATAGRAMS_RECEIVED, UDP_DATAGRAMS_SENT};

/// Outcome of sending one datagram
#[derive(Debug)]
pub enum SendStatus {
    /// The whole datagram was handed to the OS
    Sent(usize),
    /// Failure that may clear up on its own, e.g. an ICMP port unreachable
    /// reported for an earlier datagram
    Transient(io::Error),
    /// Failure that will repeat on every send
    Fatal(io::Error),
}

impl SendStatus {
    pub fn from_error(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::TimedOut
            | io::ErrorKind::WouldBlock => SendStatus::Transient(err),
            _ => SendStatus::Fatal(err),
        }
    }

    pub fn is_sent(&self) -> bool {
        matches!(self, SendStatus::Sent(_))
    }
}

/// Mutable per-adapter session state
#[derive(Debug, Default)]
struct PeerSession {
    active: Option<SocketAddr>,
}

/// A UDP socket plus the endpoint it currently talks to.
///
/// The active endpoint sits behind one lock shared by readers and writers.
/// A write racing a receive from a different sender may go to either peer;
/// callers that interleave exchanges should serialize each request/reply.
pub struct UdpPeer {
    socket: Arc<UdpSocket>,
    session: Mutex<PeerSession>,
    connected: bool,
}

impl UdpPeer {
    /// Client mode: bind an ephemeral wildcard socket and connect it to `info`
    pub async fn connect(info: &ConnectInfo) -> Result<Self> {
        let target = tokio::net::lookup_host(info.target()?)
            .await?
            .next()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    format!("no address found for {}", info.host),
                )
            })?;

        let local: SocketAddr = if target.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(target).await?;
        debug!("UDP client {} -> {}", socket.local_addr()?, target);

        Ok(Self {
            socket: Arc::new(socket),
            session: Mutex::new(PeerSession {
                active: Some(target),
            }),
            connected: true,
        })
    }

    /// Listener mode: bind `addr` with no active endpoint yet
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        debug!("UDP socket bound on {}", socket.local_addr()?);
        Ok(Self::from_socket(Arc::new(socket)))
    }

    /// Listener mode over an already bound socket
    pub fn from_socket(socket: Arc<UdpSocket>) -> Self {
        Self {
            socket,
            session: Mutex::new(PeerSession::default()),
            connected: false,
        }
    }

    /// Target `peer` for sends without connecting the socket, so datagrams
    /// from any source are still received.
    pub fn soft_connect(&self, peer: SocketAddr) {
        self.session.lock().active = Some(peer);
        trace!("UDP soft-connected to {}", peer);
    }

    pub fn active_endpoint(&self) -> Option<SocketAddr> {
        self.session.lock().active
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    fn observe(&self, from: SocketAddr) {
        let mut session = self.session.lock();
        if session.active != Some(from) {
            trace!("UDP active endpoint {:?} -> {}", session.active, from);
            session.active = Some(from);
        }
    }

    /// Receive one datagram into `buf`, updating the active endpoint
    pub fn poll_recv_from(
        &self,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<SocketAddr>> {
        let from = ready!(self.socket.poll_recv_from(cx, buf))?;
        self.observe(from);
        UDP_DATAGRAMS_RECEIVED.inc();
        trace!("UDP received {} bytes from {}", buf.filled().len(), from);
        Poll::Ready(Ok(from))
    }

    pub async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let (n, from) = self.socket.recv_from(buf).await?;
        self.observe(from);
        UDP_DATAGRAMS_RECEIVED.inc();
        trace!("UDP received {} bytes from {}", n, from);
        Ok((n, from))
    }

    /// Send `buf` as one datagram to the active endpoint
    pub fn poll_send(&self, cx: &mut Context<'_>, buf: &[u8]) -> Poll<SendStatus> {
        let result = if self.connected {
            ready!(self.socket.poll_send(cx, buf))
        } else {
            let Some(target) = self.active_endpoint() else {
                return Poll::Ready(SendStatus::Fatal(io::Error::new(
                    io::ErrorKind::NotConnected,
                    "no active UDP endpoint to send to",
                )));
            };
            ready!(self.socket.poll_send_to(cx, buf, target))
        };

        Poll::Ready(match result {
            Ok(n) => {
                UDP_DATAGRAMS_SENT.inc();
                SendStatus::Sent(n)
            }
            Err(e) => SendStatus::from_error(e),
        })
    }

    pub async fn send(&self, buf: &[u8]) -> SendStatus {
        std::future::poll_fn(|cx| self.poll_send(cx, buf)).await
    }
}

impl std::fmt::Debug for UdpPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpPeer")
            .field("local", &self.socket.local_addr().ok())
            .field("active", &self.active_endpoint())
            .field("connected", &self.connected)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn loopback_socket() -> UdpSocket {
        UdpSocket::bind("127.0.0.1:0").await.unwrap()
    }

    fn connect_info(addr: SocketAddr) -> ConnectInfo {
        ConnectInfo {
            host: addr.ip().to_string(),
            port: i32::from(addr.port()),
        }
    }

    #[tokio::test]
    async fn test_client_mode_targets_remote() {
        let remote = loopback_socket().await;
        let remote_addr = remote.local_addr().unwrap();

        let peer = UdpPeer::connect(&connect_info(remote_addr)).await.unwrap();
        assert!(peer.is_connected());
        assert_eq!(peer.active_endpoint(), Some(remote_addr));

        assert!(peer.send(b"hello").await.is_sent());
        let mut buf = [0u8; 16];
        let (n, from) = remote.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello");
        assert_eq!(from, peer.local_addr().unwrap());
    }

    #[tokio::test]
    async fn test_listener_mode_without_target_fails_fatally() {
        let peer = UdpPeer::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        assert!(peer.active_endpoint().is_none());
        assert!(matches!(peer.send(b"x").await, SendStatus::Fatal(_)));
    }

    #[tokio::test]
    async fn test_listener_mode_replies_to_last_sender() {
        let peer = UdpPeer::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let peer_addr = peer.local_addr().unwrap();
        let first = loopback_socket().await;
        let second = loopback_socket().await;
        let mut buf = [0u8; 16];

        first.send_to(b"a", peer_addr).await.unwrap();
        let (_, from) = peer.recv_from(&mut buf).await.unwrap();
        assert_eq!(from, first.local_addr().unwrap());
        assert_eq!(peer.active_endpoint(), Some(from));

        second.send_to(b"b", peer_addr).await.unwrap();
        peer.recv_from(&mut buf).await.unwrap();
        assert_eq!(peer.active_endpoint(), Some(second.local_addr().unwrap()));

        assert!(peer.send(b"reply").await.is_sent());
        let (n, _) = second.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"reply");
    }

    #[tokio::test]
    async fn test_soft_connect_keeps_any_source() {
        let peer = UdpPeer::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let peer_addr = peer.local_addr().unwrap();
        let target = loopback_socket().await;
        let stranger = loopback_socket().await;

        peer.soft_connect(target.local_addr().unwrap());
        assert!(!peer.is_connected());
        assert!(peer.send(b"out").await.is_sent());
        let mut buf = [0u8; 16];
        let (n, _) = target.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"out");

        // A datagram from an unrelated port still arrives
        stranger.send_to(b"in", peer_addr).await.unwrap();
        let (n, from) = peer.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"in");
        assert_eq!(from, stranger.local_addr().unwrap());
    }

    #[test]
    fn test_send_status_classification() {
        let refused = io::Error::from(io::ErrorKind::ConnectionRefused);
        assert!(matches!(SendStatus::from_error(refused), SendStatus::Transient(_)));

        let denied = io::Error::from(io::ErrorKind::PermissionDenied);
        assert!(matches!(SendStatus::from_error(denied), SendStatus::Fatal(_)));
    }
}
