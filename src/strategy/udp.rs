//! UDP strategies
//!
//! `UDP:[host]:port` connects a fresh socket on every call.
//! `UDP-LISTEN:[bind]:port` owns one started [`UdpSessionListener`].

use std::sync::Arc;

use async_trait::async_trait;

use crate::common::endpoint::{parse_connect_info, parse_listen_info};
use crate::common::{AddressRecord, ConnectInfo, EndpointInfo, ListenInfo, Result};
use crate::config::UdpSettings;
use crate::transport::udp;
use crate::transport::{ListenPiper, Piper, UdpListenPiper, UdpSessionListener};

use super::{ListenPiperStrategy, PiperStrategy, ResolvedEndpoint, StrategyResolver};

const UDP_TAG: &str = "UDP";
const UDP_LISTEN_TAG: &str = "UDP-LISTEN";

/// Client-side UDP endpoint
pub struct UdpConnectStrategy {
    info: ConnectInfo,
    settings: UdpSettings,
}

impl UdpConnectStrategy {
    pub fn new(info: ConnectInfo, settings: UdpSettings) -> Self {
        Self { info, settings }
    }
}

#[async_trait]
impl PiperStrategy for UdpConnectStrategy {
    fn info(&self) -> EndpointInfo {
        EndpointInfo::Connect(self.info.clone())
    }

    async fn connect(&self) -> Result<Piper> {
        udp::connect(&self.info, &self.settings).await
    }
}

/// Listening UDP endpoint with its single listener
pub struct UdpListenStrategy {
    info: ListenInfo,
    listener: Arc<UdpSessionListener>,
    piper: Arc<UdpListenPiper>,
}

impl UdpListenStrategy {
    /// Creates and starts the listener; binding waits for first use
    pub fn new(info: ListenInfo, settings: UdpSettings) -> Self {
        let listener = Arc::new(UdpSessionListener::new(info.clone(), settings));
        listener.start();
        let piper = Arc::new(UdpListenPiper::new(Arc::clone(&listener)));
        Self {
            info,
            listener,
            piper,
        }
    }

    pub fn listener(&self) -> &Arc<UdpSessionListener> {
        &self.listener
    }
}

impl ListenPiperStrategy for UdpListenStrategy {
    fn info(&self) -> EndpointInfo {
        EndpointInfo::Listen(self.info.clone())
    }

    fn listen_piper(&self) -> Arc<dyn ListenPiper> {
        self.piper.clone()
    }
}

pub struct UdpConnectResolver {
    settings: UdpSettings,
}

impl UdpConnectResolver {
    pub fn new(settings: UdpSettings) -> Self {
        Self { settings }
    }
}

impl StrategyResolver for UdpConnectResolver {
    fn name(&self) -> &'static str {
        "udp-connect"
    }

    fn tags(&self) -> &'static [&'static str] {
        &[UDP_TAG]
    }

    fn resolve(&self, record: &AddressRecord) -> Result<Option<ResolvedEndpoint>> {
        Ok(parse_connect_info(record, UDP_TAG)?.map(|info| {
            ResolvedEndpoint::Connect(Arc::new(UdpConnectStrategy::new(
                info,
                self.settings.clone(),
            )))
        }))
    }
}

pub struct UdpListenResolver {
    settings: UdpSettings,
}

impl UdpListenResolver {
    pub fn new(settings: UdpSettings) -> Self {
        Self { settings }
    }
}

impl StrategyResolver for UdpListenResolver {
    fn name(&self) -> &'static str {
        "udp-listen"
    }

    fn tags(&self) -> &'static [&'static str] {
        &[UDP_LISTEN_TAG]
    }

    fn resolve(&self, record: &AddressRecord) -> Result<Option<ResolvedEndpoint>> {
        Ok(parse_listen_info(record, UDP_LISTEN_TAG)?.map(|info| {
            ResolvedEndpoint::Listen(Arc::new(UdpListenStrategy::new(
                info,
                self.settings.clone(),
            )))
        }))
    }
}
