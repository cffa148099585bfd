//! Runtime - turns two address records into one relayed session
//!
//! The runtime is responsible for:
//! - Resolving both records before any socket is opened
//! - Opening the first endpoint, then the second
//! - Relaying until the session ends or shutdown is requested
//! - Closing every piper and listener exactly once

use std::future::Future;

use tracing::{debug, info, warn};

use crate::common::{relay, AddressRecord, RelayStats, Result};
use crate::config::Config;
use crate::strategy::{ResolvedEndpoint, StrategyRegistry};
use crate::transport::Piper;

use super::metrics::format_bytes;

/// Runtime manages one relay session
pub struct Runtime {
    config: Config,
    registry: StrategyRegistry,
}

impl Runtime {
    /// Build runtime from configuration
    pub fn from_config(config: Config) -> Result<Self> {
        config.validate()?;
        let registry = StrategyRegistry::with_defaults(&config.udp)?;
        Ok(Self { config, registry })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &StrategyRegistry {
        &self.registry
    }

    /// Parse and resolve a single `TAG:ADDRESS` text
    pub fn resolve(&self, spec: &str) -> Result<ResolvedEndpoint> {
        let record = AddressRecord::parse(spec)?;
        self.registry.resolve(&record)
    }

    /// Resolve both records. Any validation error is returned before the
    /// caller gets a chance to open anything.
    pub fn resolve_pair(
        &self,
        first: &str,
        second: &str,
    ) -> Result<(ResolvedEndpoint, ResolvedEndpoint)> {
        let first = self.resolve(first)?;
        let second = self.resolve(second)?;
        Ok((first, second))
    }

    /// Resolve, open and relay. Returns `None` when `shutdown` completed
    /// before the session ended.
    pub async fn run<S>(&self, first: &str, second: &str, shutdown: S) -> Result<Option<RelayStats>>
    where
        S: Future<Output = ()>,
    {
        let (first, second) = self.resolve_pair(first, second)?;
        self.run_resolved(&first, &second, shutdown).await
    }

    /// Same as [`Runtime::run`] for endpoints that are already resolved
    pub async fn run_resolved<S>(
        &self,
        first: &ResolvedEndpoint,
        second: &ResolvedEndpoint,
        shutdown: S,
    ) -> Result<Option<RelayStats>>
    where
        S: Future<Output = ()>,
    {
        info!("Relaying {} <-> {}", first.info(), second.info());

        let result = tokio::select! {
            result = self.session(first, second) => result.map(Some),
            _ = shutdown => {
                info!("Shutting down...");
                Ok(None)
            }
        };

        close_listener(first).await;
        close_listener(second).await;

        if let Ok(Some(stats)) = &result {
            info!(
                "Session finished: {} forward, {} backward",
                format_bytes(stats.forward),
                format_bytes(stats.backward)
            );
        }
        result
    }

    async fn session(
        &self,
        first: &ResolvedEndpoint,
        second: &ResolvedEndpoint,
    ) -> Result<RelayStats> {
        let mut first_piper = open(first).await?;
        let second_piper = match open(second).await {
            Ok(piper) => piper,
            Err(e) => {
                if let Err(close_err) = first_piper.close().await {
                    debug!("closing {} failed: {}", first_piper.label(), close_err);
                }
                return Err(e);
            }
        };

        info!("Session open: {} <-> {}", first_piper.label(), second_piper.label());
        Ok(relay(first_piper, second_piper, &self.config.relay).await)
    }
}

/// Connect endpoints open a fresh transport; listen endpoints wait for one
/// inbound session.
async fn open(endpoint: &ResolvedEndpoint) -> Result<Piper> {
    match endpoint {
        ResolvedEndpoint::Connect(strategy) => {
            debug!("Connecting to {}", strategy.info());
            strategy.connect().await
        }
        ResolvedEndpoint::Listen(strategy) => {
            let listener = strategy.listen_piper();
            let addr = listener.local_addr().await?;
            info!("Listening on {}", addr);
            listener.accept().await
        }
    }
}

async fn close_listener(endpoint: &ResolvedEndpoint) {
    if let ResolvedEndpoint::Listen(strategy) = endpoint {
        if let Err(e) = strategy.listen_piper().close().await {
            warn!("Failed to close listener {}: {}", strategy.info(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream, UdpSocket};
    use tokio::sync::oneshot;

    use crate::common::Error;

    fn runtime() -> Runtime {
        Runtime::from_config(Config::default()).unwrap()
    }

    #[tokio::test]
    async fn test_invalid_record_fails_before_io() {
        let err = runtime()
            .run("UDP-LISTEN:127.0.0.1:0", "UDP:127.0.0.1:abc", std::future::pending())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidPort(_)));

        let err = runtime()
            .run("no-tag-here", "UDP:127.0.0.1:9", std::future::pending())
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_udp_listen_to_udp_echo() {
        let runtime = runtime();
        let echo = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let echo_addr = echo.local_addr().unwrap();

        let (first, second) = runtime
            .resolve_pair("UDP-LISTEN:127.0.0.1:0", &format!("UDP:{}", echo_addr))
            .unwrap();
        let ResolvedEndpoint::Listen(listen) = &first else {
            panic!("expected a listen endpoint");
        };
        let listen_addr = listen.listen_piper().local_addr().await.unwrap();

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            runtime
                .run_resolved(&first, &second, async {
                    let _ = stop_rx.await;
                })
                .await
        });

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(b"hello", listen_addr).await.unwrap();

        let mut buf = [0u8; 16];
        let (n, from) = echo.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello");
        echo.send_to(&buf[..n], from).await.unwrap();

        let (n, from) = tokio::time::timeout(Duration::from_secs(2), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..n], b"hello");
        assert_eq!(from, listen_addr);

        stop_tx.send(()).unwrap();
        let result = handle.await.unwrap().unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_tcp_session_reports_stats() {
        let runtime = runtime();
        let echo = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let echo_addr = echo.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = echo.accept().await.unwrap();
            let mut data = Vec::new();
            socket.read_to_end(&mut data).await.unwrap();
            socket.write_all(&data).await.unwrap();
        });

        let (first, second) = runtime
            .resolve_pair("TCP-LISTEN:127.0.0.1:0", &format!("TCP:{}", echo_addr))
            .unwrap();
        let ResolvedEndpoint::Listen(listen) = &first else {
            panic!("expected a listen endpoint");
        };
        let listen_addr = listen.listen_piper().local_addr().await.unwrap();

        let handle = tokio::spawn(async move {
            runtime
                .run_resolved(&first, &second, std::future::pending())
                .await
        });

        let mut client = TcpStream::connect(listen_addr).await.unwrap();
        client.write_all(b"abc").await.unwrap();
        client.shutdown().await.unwrap();
        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        assert_eq!(reply, b"abc");

        let stats = handle.await.unwrap().unwrap().unwrap();
        assert_eq!(stats, RelayStats { forward: 3, backward: 3 });
    }

    #[tokio::test]
    async fn test_failed_second_endpoint_closes_listener() {
        let runtime = runtime();
        let (first, second) = runtime
            .resolve_pair("UDP-LISTEN:127.0.0.1:0", "TCP:127.0.0.1:1")
            .unwrap();
        let ResolvedEndpoint::Listen(listen) = &first else {
            panic!("expected a listen endpoint");
        };
        let listen_addr = listen.listen_piper().local_addr().await.unwrap();

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(b"x", listen_addr).await.unwrap();

        let result = runtime
            .run_resolved(&first, &second, std::future::pending())
            .await;
        assert!(matches!(result, Err(Error::Io(_))));
        assert!(matches!(
            listen.listen_piper().accept().await,
            Err(Error::NotListening)
        ));
    }
}
