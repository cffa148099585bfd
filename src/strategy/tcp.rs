//! TCP strategies: `TCP:[host]:port` and `TCP-LISTEN:[bind]:port`

use std::sync::Arc;

use async_trait::async_trait;

use crate::common::endpoint::{parse_connect_info, parse_listen_info};
use crate::common::{AddressRecord, ConnectInfo, EndpointInfo, ListenInfo, Result};
use crate::transport::{tcp_connect, ListenPiper, Piper, TcpListenPiper};

use super::{ListenPiperStrategy, PiperStrategy, ResolvedEndpoint, StrategyResolver};

const TCP_TAG: &str = "TCP";
const TCP_LISTEN_TAG: &str = "TCP-LISTEN";

pub struct TcpConnectStrategy {
    info: ConnectInfo,
}

#[async_trait]
impl PiperStrategy for TcpConnectStrategy {
    fn info(&self) -> EndpointInfo {
        EndpointInfo::Connect(self.info.clone())
    }

    async fn connect(&self) -> Result<Piper> {
        tcp_connect(&self.info).await
    }
}

pub struct TcpListenStrategy {
    info: ListenInfo,
    piper: Arc<TcpListenPiper>,
}

impl ListenPiperStrategy for TcpListenStrategy {
    fn info(&self) -> EndpointInfo {
        EndpointInfo::Listen(self.info.clone())
    }

    fn listen_piper(&self) -> Arc<dyn ListenPiper> {
        self.piper.clone()
    }
}

pub struct TcpConnectResolver;

impl StrategyResolver for TcpConnectResolver {
    fn name(&self) -> &'static str {
        "tcp-connect"
    }

    fn tags(&self) -> &'static [&'static str] {
        &[TCP_TAG]
    }

    fn resolve(&self, record: &AddressRecord) -> Result<Option<ResolvedEndpoint>> {
        Ok(parse_connect_info(record, TCP_TAG)?
            .map(|info| ResolvedEndpoint::Connect(Arc::new(TcpConnectStrategy { info }))))
    }
}

pub struct TcpListenResolver;

impl StrategyResolver for TcpListenResolver {
    fn name(&self) -> &'static str {
        "tcp-listen"
    }

    fn tags(&self) -> &'static [&'static str] {
        &[TCP_LISTEN_TAG]
    }

    fn resolve(&self, record: &AddressRecord) -> Result<Option<ResolvedEndpoint>> {
        Ok(parse_listen_info(record, TCP_LISTEN_TAG)?.map(|info| {
            let piper = Arc::new(TcpListenPiper::new(info.clone()));
            ResolvedEndpoint::Listen(Arc::new(TcpListenStrategy { info, piper }))
        }))
    }
}
