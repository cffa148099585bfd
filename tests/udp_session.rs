//! End-to-end UDP session through the public API

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use netpipe::config::Config;
use netpipe::strategy::ResolvedEndpoint;
use netpipe::transport::{ListenPiper, Piper};
use netpipe::{AddressRecord, Error, StrategyRegistry};

fn registry() -> StrategyRegistry {
    StrategyRegistry::with_defaults(&Config::default().udp).unwrap()
}

async fn connect(registry: &StrategyRegistry, spec: &str) -> Piper {
    match registry.resolve(&AddressRecord::parse(spec).unwrap()).unwrap() {
        ResolvedEndpoint::Connect(strategy) => strategy.connect().await.unwrap(),
        ResolvedEndpoint::Listen(_) => panic!("{} resolved to a listener", spec),
    }
}

fn listener(registry: &StrategyRegistry, spec: &str) -> std::sync::Arc<dyn ListenPiper> {
    match registry.resolve(&AddressRecord::parse(spec).unwrap()).unwrap() {
        ResolvedEndpoint::Listen(strategy) => strategy.listen_piper(),
        ResolvedEndpoint::Connect(_) => panic!("{} resolved to a connector", spec),
    }
}

#[tokio::test]
async fn udp_client_and_session_exchange_bytes() {
    let registry = registry();
    let acceptor = listener(&registry, "UDP-LISTEN:127.0.0.1:0");
    let port = acceptor.local_addr().await.unwrap().port();

    let mut client = connect(&registry, &format!("UDP:127.0.0.1:{}", port)).await;
    client.write_all(b"hello").await.unwrap();

    let mut session = acceptor.accept().await.unwrap();
    let mut buf = [0u8; 5];
    session.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"hello");

    // A larger reply is chunked into several datagrams and arrives in order
    let reply: Vec<u8> = (0..2500u32).map(|i| (i % 251) as u8).collect();
    session.write_all(&reply).await.unwrap();
    session.flush().await.unwrap();

    let mut received = vec![0u8; reply.len()];
    tokio::time::timeout(Duration::from_secs(2), client.read_exact(&mut received))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, reply);

    acceptor.close().await.unwrap();
    acceptor.close().await.unwrap();
    session.close().await.unwrap();
    session.close().await.unwrap();
    client.close().await.unwrap();
}

#[tokio::test]
async fn udp_listener_serves_a_single_session() {
    let registry = registry();
    let acceptor = listener(&registry, "UDP-LISTEN:127.0.0.1:0");
    let port = acceptor.local_addr().await.unwrap().port();

    let mut client = connect(&registry, &format!("UDP:127.0.0.1:{}", port)).await;
    client.write_all(b"first").await.unwrap();
    let _session = acceptor.accept().await.unwrap();

    let second = tokio::time::timeout(Duration::from_millis(200), acceptor.accept()).await;
    assert!(second.is_err(), "second accept must not complete");
}

#[test]
fn malformed_records_are_rejected_before_io() {
    let registry = registry();
    let err = registry
        .resolve(&AddressRecord::parse("UDP:host:notaport").unwrap())
        .unwrap_err();
    assert!(matches!(err, Error::InvalidPort(_)));

    let err = registry
        .resolve(&AddressRecord::parse("QUIC:host:1").unwrap())
        .unwrap_err();
    assert!(matches!(err, Error::UnsupportedAddress(_)));
}
