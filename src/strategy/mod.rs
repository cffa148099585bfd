//! Strategy Layer
//!
//! Responsibilities:
//! - Map an [`AddressRecord`] to a way of opening that endpoint
//! - Validate the address text before any socket exists
//!
//! Each transport contributes a [`StrategyResolver`]. The
//! [`StrategyRegistry`] tries them in order; the first one that recognises
//! the record's tag wins. Resolution never performs I/O.

mod tcp;
mod udp;

pub use tcp::{TcpConnectResolver, TcpListenResolver};
pub use udp::{UdpConnectResolver, UdpConnectStrategy, UdpListenResolver, UdpListenStrategy};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::common::{AddressRecord, EndpointInfo, Error, Result};
use crate::config::UdpSettings;
use crate::transport::{ListenPiper, Piper};

/// Opens outbound endpoints. Every call creates a brand-new transport.
#[async_trait]
pub trait PiperStrategy: Send + Sync {
    fn info(&self) -> EndpointInfo;

    async fn connect(&self) -> Result<Piper>;
}

/// Owns one listener, created together with the strategy and shared by all
/// accepts.
pub trait ListenPiperStrategy: Send + Sync {
    fn info(&self) -> EndpointInfo;

    /// The listener; the same instance on every call
    fn listen_piper(&self) -> Arc<dyn ListenPiper>;
}

/// Result of resolving an address record
#[derive(Clone)]
pub enum ResolvedEndpoint {
    Connect(Arc<dyn PiperStrategy>),
    Listen(Arc<dyn ListenPiperStrategy>),
}

impl ResolvedEndpoint {
    pub fn info(&self) -> EndpointInfo {
        match self {
            ResolvedEndpoint::Connect(strategy) => strategy.info(),
            ResolvedEndpoint::Listen(strategy) => strategy.info(),
        }
    }

    pub fn is_listen(&self) -> bool {
        matches!(self, ResolvedEndpoint::Listen(_))
    }
}

impl std::fmt::Debug for ResolvedEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolvedEndpoint::Connect(s) => f.debug_tuple("Connect").field(&s.info()).finish(),
            ResolvedEndpoint::Listen(s) => f.debug_tuple("Listen").field(&s.info()).finish(),
        }
    }
}

/// Per-transport factory for endpoints
pub trait StrategyResolver: Send + Sync {
    /// Transport name used in logs
    fn name(&self) -> &'static str;

    /// Tags this resolver claims, compared case-insensitively
    fn tags(&self) -> &'static [&'static str];

    /// `Ok(None)` when the record belongs to another resolver
    fn resolve(&self, record: &AddressRecord) -> Result<Option<ResolvedEndpoint>>;
}

/// Ordered list of resolvers
pub struct StrategyRegistry {
    resolvers: Vec<Box<dyn StrategyResolver>>,
}

impl StrategyRegistry {
    /// Build a registry, failing if two resolvers claim the same tag
    pub fn new(resolvers: Vec<Box<dyn StrategyResolver>>) -> Result<Self> {
        let mut owners: HashMap<String, &'static str> = HashMap::new();
        for resolver in &resolvers {
            for tag in resolver.tags() {
                if let Some(owner) = owners.insert(tag.to_ascii_uppercase(), resolver.name()) {
                    return Err(Error::Config(format!(
                        "address tag '{}' claimed by both {} and {}",
                        tag,
                        owner,
                        resolver.name()
                    )));
                }
            }
        }
        Ok(Self { resolvers })
    }

    /// UDP and TCP, connect and listen
    pub fn with_defaults(udp: &UdpSettings) -> Result<Self> {
        Self::new(vec![
            Box::new(UdpConnectResolver::new(udp.clone())),
            Box::new(UdpListenResolver::new(udp.clone())),
            Box::new(TcpConnectResolver),
            Box::new(TcpListenResolver),
        ])
    }

    /// Tags supported by this registry, in resolver order
    pub fn tags(&self) -> Vec<&'static str> {
        self.resolvers
            .iter()
            .flat_map(|r| r.tags().iter().copied())
            .collect()
    }

    pub fn resolve(&self, record: &AddressRecord) -> Result<ResolvedEndpoint> {
        for resolver in &self.resolvers {
            if let Some(endpoint) = resolver.resolve(record)? {
                debug!("{} resolved by {}: {:?}", record, resolver.name(), endpoint);
                return Ok(endpoint);
            }
        }
        Err(Error::UnsupportedAddress(record.tag().to_string()))
    }
}
