//! Transport Layer
//!
//! Responsibilities:
//! - Open the concrete socket behind an endpoint (TCP, UDP)
//! - Present every transport as the same byte-stream contract
//! - NO framing: payload bytes are relayed opaquely
//!
//! A [`Piper`] is one open byte stream. A [`ListenPiper`] is an acceptor that
//! yields a new [`Piper`] per inbound session.

mod tcp;
pub mod udp;

pub use tcp::TcpListenPiper;
pub(crate) use tcp::connect as tcp_connect;
pub use udp::{ListenerState, SendStatus, UdpListenPiper, UdpPeer, UdpSessionListener, UdpStream};

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::runtime::Handle;

use crate::common::blocking;
use crate::common::{Result, Stream};

/// A bidirectional byte-stream endpoint
pub struct Piper {
    label: String,
    inner: Stream,
    closed: bool,
}

impl Piper {
    pub fn new(label: impl Into<String>, inner: Stream) -> Self {
        Self {
            label: label.into(),
            inner,
            closed: false,
        }
    }

    /// Human readable description used in logs
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.peer_addr()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Close the underlying transport. Only the first call reaches it.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.inner.close().await
    }

    fn closed_error() -> io::Error {
        io::Error::new(io::ErrorKind::BrokenPipe, "piper closed")
    }
}

impl std::fmt::Debug for Piper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Piper")
            .field("label", &self.label)
            .field("closed", &self.closed)
            .finish()
    }
}

impl AsyncRead for Piper {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.closed {
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for Piper {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.closed {
            return Poll::Ready(Err(Self::closed_error()));
        }
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if self.closed {
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if self.closed {
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

/// Acceptor for inbound sessions
#[async_trait]
pub trait ListenPiper: Send + Sync {
    /// Wait for the next inbound session
    async fn accept(&self) -> Result<Piper>;

    /// Runtime the listener is bound on, if it has seen one
    fn runtime(&self) -> Option<Handle> {
        None
    }

    /// Blocking variant of [`ListenPiper::accept`]. Off the runtime it waits
    /// on [`ListenPiper::runtime`].
    fn accept_blocking(&self) -> Result<Piper> {
        blocking::wait(self.runtime().as_ref(), self.accept())?
    }

    /// Local address, binding the socket first if that has not happened yet
    async fn local_addr(&self) -> Result<SocketAddr>;

    /// Stop accepting and release the listening socket. Idempotent.
    async fn close(&self) -> Result<()>;
}
