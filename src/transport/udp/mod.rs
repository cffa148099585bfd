//! UDP transport
//!
//! UDP is connectionless, so three pieces make it look like the stream
//! transports:
//! - [`UdpPeer`]: socket plus the active remote endpoint
//! - [`UdpStream`]: byte stream over a peer (chunked writes, lossless reads)
//! - [`UdpSessionListener`]: bind-once listener serving a single session

mod listener;
mod peer;
mod stream;

pub use listener::{ListenerState, UdpListenPiper, UdpSessionListener};
pub use peer::{SendStatus, UdpPeer};
pub use stream::UdpStream;

use crate::common::{ConnectInfo, Result};
use crate::config::UdpSettings;

use super::Piper;

/// Open a fresh client-mode UDP stream to `info`
pub async fn connect(info: &ConnectInfo, settings: &UdpSettings) -> Result<Piper> {
    let peer = UdpPeer::connect(info).await?;
    Ok(Piper::new(
        format!("udp {}", info),
        Box::new(UdpStream::new(peer, settings)),
    ))
}
