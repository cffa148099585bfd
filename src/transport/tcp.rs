//! TCP transport
//!
//! Stream-oriented sibling of the UDP transport. TCP already is a byte
//! stream, so a connection is handed out as-is.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::common::{ConnectInfo, Error, ListenInfo, Result};
use crate::metrics::SESSIONS_ACCEPTED;

use super::{ListenPiper, Piper};

/// Open a fresh TCP connection
pub async fn connect(info: &ConnectInfo) -> Result<Piper> {
    let stream = TcpStream::connect(info.target()?).await?;

    // Disable Nagle's algorithm for lower latency
    stream.set_nodelay(true)?;

    debug!("TCP connected to {}", info);
    Ok(Piper::new(format!("tcp {}", info), Box::new(stream)))
}

/// TCP listener, bound on first use and able to accept many sessions
pub struct TcpListenPiper {
    info: ListenInfo,
    listener: Mutex<Option<Arc<TcpListener>>>,
    bind_lock: tokio::sync::Mutex<()>,
    closed: watch::Sender<bool>,
    runtime: Mutex<Option<Handle>>,
}

impl TcpListenPiper {
    pub fn new(info: ListenInfo) -> Self {
        Self {
            info,
            listener: Mutex::new(None),
            bind_lock: tokio::sync::Mutex::new(()),
            closed: watch::Sender::new(false),
            runtime: Mutex::new(Handle::try_current().ok()),
        }
    }

    async fn listener(&self) -> Result<Arc<TcpListener>> {
        if *self.closed.borrow() {
            return Err(Error::NotListening);
        }
        let existing = self.listener.lock().clone();
        if let Some(listener) = existing {
            return Ok(listener);
        }

        let _guard = self.bind_lock.lock().await;
        let existing = self.listener.lock().clone();
        if let Some(listener) = existing {
            return Ok(listener);
        }

        let listener = Arc::new(TcpListener::bind(self.info.socket_addr()?).await?);
        if let Ok(handle) = Handle::try_current() {
            *self.runtime.lock() = Some(handle);
        }
        info!("TCP listening on {}", listener.local_addr()?);
        *self.listener.lock() = Some(Arc::clone(&listener));
        Ok(listener)
    }
}

#[async_trait]
impl ListenPiper for TcpListenPiper {
    async fn accept(&self) -> Result<Piper> {
        let listener = self.listener().await?;
        let mut closed = self.closed.subscribe();

        let (stream, peer) = tokio::select! {
            accepted = listener.accept() => accepted?,
            _ = closed.wait_for(|closed| *closed) => return Err(Error::ConnectionClosed),
        };
        stream.set_nodelay(true)?;

        SESSIONS_ACCEPTED.with_label_values(&["tcp"]).inc();
        info!("Accepted TCP connection from {}", peer);
        Ok(Piper::new(format!("tcp session {}", peer), Box::new(stream)))
    }

    fn runtime(&self) -> Option<Handle> {
        self.runtime.lock().clone()
    }

    async fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener().await?.local_addr()?)
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.send_replace(true) {
            self.listener.lock().take();
            debug!("TCP listener on {} closed", self.info);
        }
        Ok(())
    }
}
