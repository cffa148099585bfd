//! Stream abstraction
//!
//! Every transport, whether stream or datagram based, is exposed to the rest
//! of the crate as a [`ByteTransport`].

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::Result;

/// Async byte stream with an explicit, idempotent close.
#[async_trait]
pub trait ByteTransport: AsyncRead + AsyncWrite + Unpin + Send {
    /// Remote end this transport currently talks to, if known
    fn peer_addr(&self) -> Option<SocketAddr>;

    /// Flush pending output and release the transport. Closing twice is a no-op.
    async fn close(&mut self) -> Result<()>;
}

/// The boxed stream type passed between layers
pub type Stream = Box<dyn ByteTransport>;

#[async_trait]
impl ByteTransport for TcpStream {
    fn peer_addr(&self) -> Option<SocketAddr> {
        TcpStream::peer_addr(self).ok()
    }

    async fn close(&mut self) -> Result<()> {
        match self.shutdown().await {
            Ok(()) => Ok(()),
            // Already shut down, or the peer went away first
            Err(e) if e.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
#[async_trait]
impl ByteTransport for tokio::io::DuplexStream {
    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }

    async fn close(&mut self) -> Result<()> {
        self.shutdown().await?;
        Ok(())
    }
}
