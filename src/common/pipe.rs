//! Pipe - bidirectional relay between two endpoints
//!
//! Copies bytes both ways until one direction finishes, then gives the other
//! direction a short linger period. Datagram endpoints never report EOF, so
//! without the linger a relay over UDP would never end.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use crate::config::RelaySettings;
use crate::metrics::RELAY_BYTES;
use crate::transport::Piper;

/// Byte counts of a finished relay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Bytes copied from the first endpoint to the second
    pub forward: u64,
    /// Bytes copied from the second endpoint to the first
    pub backward: u64,
}

/// Relay data between two pipers until both directions finish, the linger
/// period expires, or an idle timeout hits. Both pipers are closed afterwards.
pub async fn relay(first: Piper, second: Piper, settings: &RelaySettings) -> RelayStats {
    let (mut first_reader, mut first_writer) = tokio::io::split(first);
    let (mut second_reader, mut second_writer) = tokio::io::split(second);

    let forward_bytes = AtomicU64::new(0);
    let backward_bytes = AtomicU64::new(0);

    {
        let forward = copy_half(
            &mut first_reader,
            &mut second_writer,
            settings,
            &forward_bytes,
            "forward",
        );
        let backward = copy_half(
            &mut second_reader,
            &mut first_writer,
            settings,
            &backward_bytes,
            "backward",
        );
        tokio::pin!(forward, backward);

        tokio::select! {
            _ = &mut forward => {
                if tokio::time::timeout(settings.linger(), &mut backward).await.is_err() {
                    trace!("backward direction still open after linger");
                }
            }
            _ = &mut backward => {
                if tokio::time::timeout(settings.linger(), &mut forward).await.is_err() {
                    trace!("forward direction still open after linger");
                }
            }
        }
    }

    let mut first = first_reader.unsplit(first_writer);
    let mut second = second_reader.unsplit(second_writer);
    for piper in [&mut first, &mut second] {
        if let Err(e) = piper.close().await {
            debug!("closing {} failed: {}", piper.label(), e);
        }
    }

    RelayStats {
        forward: forward_bytes.load(Ordering::Relaxed),
        backward: backward_bytes.load(Ordering::Relaxed),
    }
}

async fn copy_half<R, W>(
    reader: &mut R,
    writer: &mut W,
    settings: &RelaySettings,
    total: &AtomicU64,
    direction: &'static str,
) where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = BytesMut::zeroed(settings.buffer_size);

    loop {
        let read = reader.read(&mut buf);
        let n = match settings.idle_timeout() {
            Some(idle) => match tokio::time::timeout(idle, read).await {
                Ok(result) => result,
                Err(_) => {
                    debug!("{} direction idle for {:?}", direction, idle);
                    break;
                }
            },
            None => read.await,
        };

        let n = match n {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!("{} read failed: {}", direction, e);
                break;
            }
        };

        if let Err(e) = writer.write_all(&buf[..n]).await {
            debug!("{} write failed: {}", direction, e);
            break;
        }
        // Flush to ensure data is sent immediately
        if writer.flush().await.is_err() {
            break;
        }

        total.fetch_add(n as u64, Ordering::Relaxed);
        RELAY_BYTES.with_label_values(&[direction]).inc_by(n as u64);
    }

    // Always try to shutdown
    let _ = writer.shutdown().await;
}
