//! Datagram session listener
//!
//! A UDP "listener" serves exactly one session for its whole lifetime:
//!
//! ```text
//!            start()               stop()
//! Stopped ─────────────▶ Listening ─────────▶ Stopped
//! ```
//!
//! The first `accept` on a listening instance claims the session, waits for a
//! datagram and returns a stream targeting its sender. Later accepts either
//! park until [`UdpSessionListener::release_parked`] is called or fail with
//! [`Error::AlreadyAccepted`], depending on [`SecondAcceptPolicy`]. `stop`
//! interrupts an accept that is waiting for the first datagram but leaves
//! parked callers parked.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::common::blocking;
use crate::common::{Error, ListenInfo, Result};
use crate::config::{SecondAcceptPolicy, UdpSettings};
use crate::metrics::SESSIONS_ACCEPTED;
use crate::transport::{ListenPiper, Piper};

use super::peer::UdpPeer;
use super::stream::UdpStream;

/// Lifecycle state of a [`UdpSessionListener`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListenerState {
    #[default]
    Stopped,
    Listening,
}

impl std::fmt::Display for ListenerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerState::Stopped => write!(f, "Stopped"),
            ListenerState::Listening => write!(f, "Listening"),
        }
    }
}

/// Single-session UDP listener
pub struct UdpSessionListener {
    info: ListenInfo,
    settings: UdpSettings,
    socket: Mutex<Option<Arc<UdpSocket>>>,
    bind_lock: tokio::sync::Mutex<()>,
    state: watch::Sender<ListenerState>,
    claimed: AtomicBool,
    parked_released: watch::Sender<bool>,
    /// Runtime the socket lives on, for blocking accepts off the runtime
    runtime: Mutex<Option<Handle>>,
}

impl UdpSessionListener {
    /// Create a stopped listener. Nothing is bound until the first accept or
    /// [`UdpSessionListener::bind`].
    pub fn new(info: ListenInfo, settings: UdpSettings) -> Self {
        Self {
            info,
            settings,
            socket: Mutex::new(None),
            bind_lock: tokio::sync::Mutex::new(()),
            state: watch::Sender::new(ListenerState::Stopped),
            claimed: AtomicBool::new(false),
            parked_released: watch::Sender::new(false),
            runtime: Mutex::new(Handle::try_current().ok()),
        }
    }

    pub fn info(&self) -> &ListenInfo {
        &self.info
    }

    pub fn state(&self) -> ListenerState {
        *self.state.borrow()
    }

    /// Runtime captured at construction or bind time
    pub fn runtime(&self) -> Option<Handle> {
        self.runtime.lock().clone()
    }

    /// Whether the one session has been handed out
    pub fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::Acquire)
    }

    /// Enter `Listening`. Does not bind.
    pub fn start(&self) {
        let changed = self.state.send_if_modified(|state| {
            if *state == ListenerState::Listening {
                false
            } else {
                *state = ListenerState::Listening;
                true
            }
        });
        if changed {
            info!("UDP listener on {} started", self.info);
        }
    }

    /// Enter `Stopped` and release the listening socket. Idempotent.
    ///
    /// An accepted session keeps its own handle on the socket.
    pub fn stop(&self) {
        let previous = self.state.send_replace(ListenerState::Stopped);
        let released = self.socket.lock().take();
        if previous == ListenerState::Listening || released.is_some() {
            info!("UDP listener on {} stopped", self.info);
        }
    }

    /// Wake every accept parked behind an already claimed session; they
    /// return [`Error::Cancelled`].
    pub fn release_parked(&self) {
        if !self.parked_released.send_replace(true) {
            debug!("Released parked accepts on {}", self.info);
        }
    }

    /// Bind the socket if that has not happened yet and return its address
    pub async fn bind(&self) -> Result<SocketAddr> {
        Ok(self.socket().await?.local_addr()?)
    }

    async fn socket(&self) -> Result<Arc<UdpSocket>> {
        let existing = self.socket.lock().clone();
        if let Some(socket) = existing {
            return Ok(socket);
        }

        let _guard = self.bind_lock.lock().await;
        let existing = self.socket.lock().clone();
        if let Some(socket) = existing {
            return Ok(socket);
        }
        if self.state() != ListenerState::Listening {
            return Err(Error::NotListening);
        }

        let socket = Arc::new(UdpSocket::bind(self.info.socket_addr()?).await?);
        if let Ok(handle) = Handle::try_current() {
            *self.runtime.lock() = Some(handle);
        }
        info!("UDP listener bound on {}", socket.local_addr()?);
        *self.socket.lock() = Some(Arc::clone(&socket));
        Ok(socket)
    }

    /// Wait for the single session
    pub async fn accept(&self) -> Result<UdpStream> {
        if self.state() != ListenerState::Listening {
            return Err(Error::NotListening);
        }
        if self
            .claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return self.refuse_accept().await;
        }

        let socket = self.socket().await?;
        let mut state = self.state.subscribe();
        let mut buf = vec![0u8; self.settings.recv_buffer_size];

        let (n, peer_addr) = tokio::select! {
            received = socket.recv_from(&mut buf) => received?,
            _ = state.wait_for(|s| *s == ListenerState::Stopped) => {
                debug!("UDP listener on {} stopped while accepting", self.info);
                return Err(Error::ConnectionClosed);
            }
        };

        SESSIONS_ACCEPTED.with_label_values(&["udp"]).inc();
        info!("Accepted UDP session from {}", peer_addr);

        let peer = UdpPeer::from_socket(socket);
        peer.soft_connect(peer_addr);
        Ok(UdpStream::with_carryover(peer, &self.settings, &buf[..n]))
    }

    /// Blocking variant of [`UdpSessionListener::accept`]. Callable from
    /// any thread once the listener has seen a multi-threaded runtime.
    pub fn accept_blocking(&self) -> Result<UdpStream> {
        blocking::wait(self.runtime().as_ref(), self.accept())?
    }

    async fn refuse_accept(&self) -> Result<UdpStream> {
        match self.settings.second_accept {
            SecondAcceptPolicy::Reject => Err(Error::AlreadyAccepted),
            SecondAcceptPolicy::Park => {
                debug!("UDP session on {} already claimed, parking accept", self.info);
                let mut released = self.parked_released.subscribe();
                // The sender lives as long as `self`, so this only ends on release
                let _ = released.wait_for(|released| *released).await;
                Err(Error::Cancelled)
            }
        }
    }
}

impl Drop for UdpSessionListener {
    fn drop(&mut self) {
        self.stop();
    }
}

/// [`ListenPiper`] over a started [`UdpSessionListener`]
pub struct UdpListenPiper {
    listener: Arc<UdpSessionListener>,
}

impl UdpListenPiper {
    pub fn new(listener: Arc<UdpSessionListener>) -> Self {
        Self { listener }
    }

    pub fn listener(&self) -> &Arc<UdpSessionListener> {
        &self.listener
    }
}

#[async_trait]
impl ListenPiper for UdpListenPiper {
    async fn accept(&self) -> Result<Piper> {
        let stream = self.listener.accept().await?;
        let label = match stream.peer().and_then(UdpPeer::active_endpoint) {
            Some(peer) => format!("udp session {}", peer),
            None => "udp session".to_string(),
        };
        Ok(Piper::new(label, Box::new(stream)))
    }

    fn runtime(&self) -> Option<Handle> {
        self.listener.runtime()
    }

    async fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.bind().await
    }

    async fn close(&self) -> Result<()> {
        self.listener.stop();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use crate::common::ByteTransport;

    fn listener_with(policy: SecondAcceptPolicy) -> Arc<UdpSessionListener> {
        let info = ListenInfo {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
        };
        let settings = UdpSettings {
            second_accept: policy,
            ..Default::default()
        };
        Arc::new(UdpSessionListener::new(info, settings))
    }

    #[tokio::test]
    async fn test_accept_before_start_fails_fast() {
        let listener = listener_with(SecondAcceptPolicy::Park);
        assert_eq!(listener.state(), ListenerState::Stopped);
        assert!(matches!(listener.accept().await, Err(Error::NotListening)));
        // A rejected accept does not consume the session
        assert!(!listener.is_claimed());
    }

    #[tokio::test]
    async fn test_start_and_stop_are_idempotent() {
        let listener = listener_with(SecondAcceptPolicy::Park);
        listener.start();
        listener.start();
        assert_eq!(listener.state(), ListenerState::Listening);

        listener.bind().await.unwrap();
        listener.stop();
        listener.stop();
        assert_eq!(listener.state(), ListenerState::Stopped);
    }

    #[tokio::test]
    async fn test_accept_returns_first_datagram() {
        let listener = listener_with(SecondAcceptPolicy::Park);
        listener.start();
        let addr = listener.bind().await.unwrap();

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(b"hello listener", addr).await.unwrap();

        let mut session = listener.accept().await.unwrap();
        assert_eq!(session.peer_addr(), Some(client.local_addr().unwrap()));

        let mut buf = [0u8; 14];
        session.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello listener");

        session.write_all(b"welcome").await.unwrap();
        session.flush().await.unwrap();
        let mut reply = [0u8; 16];
        let (n, from) = client.recv_from(&mut reply).await.unwrap();
        assert_eq!(&reply[..n], b"welcome");
        assert_eq!(from, addr);
    }

    #[tokio::test]
    async fn test_second_accept_parks() {
        let listener = listener_with(SecondAcceptPolicy::Park);
        listener.start();
        let addr = listener.bind().await.unwrap();

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(b"x", addr).await.unwrap();
        let _session = listener.accept().await.unwrap();

        let second = tokio::time::timeout(Duration::from_millis(200), listener.accept()).await;
        assert!(second.is_err(), "second accept must not return");
    }

    #[tokio::test]
    async fn test_stop_does_not_release_parked_accept() {
        let listener = listener_with(SecondAcceptPolicy::Park);
        listener.start();
        let addr = listener.bind().await.unwrap();

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(b"x", addr).await.unwrap();
        let _session = listener.accept().await.unwrap();

        let parked = tokio::spawn({
            let listener = listener.clone();
            async move { listener.accept().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        listener.stop();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!parked.is_finished());

        listener.release_parked();
        let result = tokio::time::timeout(Duration::from_secs(1), parked)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn test_second_accept_rejected() {
        let listener = listener_with(SecondAcceptPolicy::Reject);
        listener.start();
        let addr = listener.bind().await.unwrap();

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(b"x", addr).await.unwrap();
        let _session = listener.accept().await.unwrap();

        assert!(matches!(listener.accept().await, Err(Error::AlreadyAccepted)));
    }

    #[tokio::test]
    async fn test_stop_unblocks_waiting_accept() {
        let listener = listener_with(SecondAcceptPolicy::Park);
        listener.start();
        listener.bind().await.unwrap();

        let waiting = tokio::spawn({
            let listener = listener.clone();
            async move { listener.accept().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        listener.stop();

        let result = tokio::time::timeout(Duration::from_secs(1), waiting)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(Error::ConnectionClosed)));
        assert!(listener.is_claimed());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_accept_blocking() {
        let listener = listener_with(SecondAcceptPolicy::Park);
        listener.start();
        let addr = listener.bind().await.unwrap();

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(b"sync", addr).await.unwrap();

        let mut session = listener.accept_blocking().unwrap();
        let mut buf = [0u8; 4];
        session.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"sync");
    }

    #[test]
    fn test_accept_blocking_from_plain_thread() {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        let listener = listener_with(SecondAcceptPolicy::Park);
        listener.start();
        let addr = rt.block_on(listener.bind()).unwrap();

        let client = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        client.send_to(b"plain", addr).unwrap();

        let mut session = listener.accept_blocking().unwrap();
        let mut buf = [0u8; 8];
        let n = session.read_blocking(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"plain");
    }

    #[tokio::test]
    async fn test_session_replies_from_listen_address() {
        let listener = listener_with(SecondAcceptPolicy::Park);
        listener.start();
        let addr = listener.bind().await.unwrap();

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(b"hi", addr).await.unwrap();

        let mut session = listener.accept().await.unwrap();
        let session_local = session.peer().unwrap().local_addr().unwrap();
        assert_eq!(session_local, addr);

        // No rebind before the first write: the reply leaves the socket the
        // client addressed
        session.write_all(b"back").await.unwrap();
        let mut buf = [0u8; 8];
        let (n, from) = tokio::time::timeout(Duration::from_secs(2), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..n], b"back");
        assert_eq!(from, addr);
    }

    #[tokio::test]
    async fn test_listen_piper_close_twice() {
        let listener = listener_with(SecondAcceptPolicy::Park);
        listener.start();
        let piper = UdpListenPiper::new(listener.clone());
        piper.local_addr().await.unwrap();

        piper.close().await.unwrap();
        piper.close().await.unwrap();
        assert_eq!(listener.state(), ListenerState::Stopped);
    }
}
