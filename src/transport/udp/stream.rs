//! Datagram-to-stream adapter
//!
//! Presents a [`UdpPeer`] as an `AsyncRead + AsyncWrite` byte stream.
//!
//! Reads are lossless: when a datagram is larger than the caller's buffer the
//! surplus is kept as carryover and returned first by the next read.
//! [`UdpStream::recv_datagram`] is the one exception, a single-datagram read
//! that drops whatever does not fit.
//!
//! Writes send the caller's bytes directly as datagrams of at most
//! `max_chunk_size` bytes to the peer's current active endpoint. A write only
//! reports bytes that were handed to the socket (or dropped under
//! [`SendErrorPolicy::Drop`]); nothing is held back for a later flush.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::runtime::Handle;
use tracing::{debug, trace, warn};

use crate::common::blocking;
use crate::common::{ByteTransport, Result};
use crate::config::{SendErrorPolicy, UdpSettings};
use crate::metrics::UDP_SEND_DROPPED;

use super::peer::{SendStatus, UdpPeer};

/// Byte stream over a datagram socket
pub struct UdpStream {
    peer: Option<UdpPeer>,
    recv_buf: Box<[u8]>,
    /// Received bytes not yet handed to a reader, oldest first
    pending_read: BytesMut,
    max_chunk_size: usize,
    send_errors: SendErrorPolicy,
    dropped_chunks: u64,
    last_send_error: Option<io::Error>,
    /// Failure hit after part of a write went out, reported by the next call
    deferred_error: Option<io::Error>,
    runtime: Option<Handle>,
}

impl UdpStream {
    pub fn new(peer: UdpPeer, settings: &UdpSettings) -> Self {
        Self {
            peer: Some(peer),
            recv_buf: vec![0u8; settings.recv_buffer_size].into_boxed_slice(),
            pending_read: BytesMut::new(),
            max_chunk_size: settings.max_chunk_size.max(1),
            send_errors: settings.send_errors,
            dropped_chunks: 0,
            last_send_error: None,
            deferred_error: None,
            runtime: Handle::try_current().ok(),
        }
    }

    /// Stream whose first reads return `carryover`, e.g. the datagram that
    /// opened an accepted session
    pub fn with_carryover(peer: UdpPeer, settings: &UdpSettings, carryover: &[u8]) -> Self {
        let mut stream = Self::new(peer, settings);
        stream.pending_read.extend_from_slice(carryover);
        stream
    }

    /// The underlying peer adapter, `None` once closed
    pub fn peer(&self) -> Option<&UdpPeer> {
        self.peer.as_ref()
    }

    /// Bytes received but not yet read
    pub fn pending_read_len(&self) -> usize {
        self.pending_read.len()
    }

    /// Chunks dropped after a transient send failure
    pub fn dropped_chunks(&self) -> u64 {
        self.dropped_chunks
    }

    /// Most recent transient send failure, cleared by this call
    pub fn take_send_error(&mut self) -> Option<io::Error> {
        self.last_send_error.take()
    }

    fn closed_error() -> io::Error {
        io::Error::new(io::ErrorKind::NotConnected, "UDP stream closed")
    }

    /// Read from a single datagram.
    ///
    /// Carryover left by a previous stream read is returned first. Otherwise
    /// one datagram is received and only `buf.len()` bytes of it are kept;
    /// the rest is discarded.
    pub async fn recv_datagram(&mut self, buf: &mut [u8]) -> Result<usize> {
        if !self.pending_read.is_empty() {
            let n = self.pending_read.len().min(buf.len());
            self.pending_read.copy_to_slice(&mut buf[..n]);
            return Ok(n);
        }

        let peer = self.peer.as_ref().ok_or_else(Self::closed_error)?;
        let (received, from) = peer.recv_from(&mut self.recv_buf).await?;
        let n = received.min(buf.len());
        buf[..n].copy_from_slice(&self.recv_buf[..n]);
        if received > n {
            debug!(
                "Discarding {} bytes of a {} byte datagram from {}",
                received - n,
                received,
                from
            );
        }
        Ok(n)
    }

    /// Blocking variant of [`UdpStream::recv_datagram`].
    ///
    /// Works from any thread while the runtime the stream was created on is
    /// alive, and from workers of a multi-threaded runtime.
    pub fn read_blocking(&mut self, buf: &mut [u8]) -> Result<usize> {
        let runtime = self.runtime.clone();
        blocking::wait(runtime.as_ref(), self.recv_datagram(buf))?
    }

    /// Apply the send-error policy to the outcome of one chunk. `Ok` means
    /// the chunk is consumed.
    fn settle(&mut self, status: SendStatus, len: usize) -> io::Result<()> {
        match status {
            SendStatus::Sent(n) => {
                trace!("UDP sent {} byte chunk", n);
                Ok(())
            }
            SendStatus::Transient(err) => match self.send_errors {
                SendErrorPolicy::Drop => {
                    warn!(
                        "Dropped {} byte datagram to {:?}: {}",
                        len,
                        self.peer.as_ref().and_then(UdpPeer::active_endpoint),
                        err
                    );
                    UDP_SEND_DROPPED.inc();
                    self.dropped_chunks += 1;
                    self.last_send_error = Some(err);
                    Ok(())
                }
                SendErrorPolicy::Propagate => Err(err),
            },
            SendStatus::Fatal(err) => Err(err),
        }
    }
}

impl AsyncRead for UdpStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let Some(peer) = this.peer.as_ref() else {
            return Poll::Ready(Ok(()));
        };

        // Serve carryover first
        let mut copied = 0;
        if !this.pending_read.is_empty() {
            copied = this.pending_read.len().min(buf.remaining());
            buf.put_slice(&this.pending_read.split_to(copied));
        }
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        loop {
            let mut datagram = ReadBuf::new(&mut this.recv_buf);
            match peer.poll_recv_from(cx, &mut datagram) {
                Poll::Ready(Ok(from)) => {
                    let received = datagram.filled();
                    if received.is_empty() {
                        // A zero-length read would look like EOF
                        trace!("Skipping empty datagram from {}", from);
                        continue;
                    }
                    let n = received.len().min(buf.remaining());
                    buf.put_slice(&received[..n]);
                    this.pending_read.extend_from_slice(&received[n..]);
                    return Poll::Ready(Ok(()));
                }
                Poll::Ready(Err(e))
                    if matches!(
                        e.kind(),
                        io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset
                    ) =>
                {
                    // ICMP error for an earlier send; the socket is still usable
                    debug!("UDP receive reported {}", e);
                    if copied > 0 {
                        return Poll::Ready(Ok(()));
                    }
                }
                Poll::Ready(Err(e)) => {
                    return if copied > 0 {
                        Poll::Ready(Ok(()))
                    } else {
                        Poll::Ready(Err(e))
                    };
                }
                Poll::Pending => {
                    return if copied > 0 {
                        Poll::Ready(Ok(()))
                    } else {
                        Poll::Pending
                    };
                }
            }
        }
    }
}

impl AsyncWrite for UdpStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if let Some(err) = this.deferred_error.take() {
            return Poll::Ready(Err(err));
        }

        let mut written = 0;
        while written < buf.len() {
            let len = (buf.len() - written).min(this.max_chunk_size);
            let polled = match this.peer.as_ref() {
                Some(peer) => peer.poll_send(cx, &buf[written..written + len]),
                None => return Poll::Ready(Err(Self::closed_error())),
            };
            let status = match polled {
                Poll::Ready(status) => status,
                Poll::Pending if written > 0 => return Poll::Ready(Ok(written)),
                Poll::Pending => return Poll::Pending,
            };

            if let Err(err) = this.settle(status, len) {
                if written == 0 {
                    return Poll::Ready(Err(err));
                }
                // Report what went out now, the failure on the next call
                this.deferred_error = Some(err);
                return Poll::Ready(Ok(written));
            }
            written += len;
        }

        Poll::Ready(Ok(written))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().deferred_error.take() {
            Some(err) => Poll::Ready(Err(err)),
            None => Poll::Ready(Ok(())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        // Datagrams have no half-close
        self.poll_flush(cx)
    }
}

#[async_trait]
impl ByteTransport for UdpStream {
    fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer.as_ref().and_then(UdpPeer::active_endpoint)
    }

    async fn close(&mut self) -> Result<()> {
        // Dropping the peer releases this stream's handle on the socket
        if let Some(peer) = self.peer.take() {
            debug!("UDP stream {:?} closed", peer);
        }
        self.pending_read.clear();
        self.deferred_error = None;
        Ok(())
    }
}

impl std::fmt::Debug for UdpStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpStream")
            .field("peer", &self.peer)
            .field("pending_read", &self.pending_read.len())
            .field("dropped_chunks", &self.dropped_chunks)
            .finish()
    }
}
