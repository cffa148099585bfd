//! Endpoint info parsing
//!
//! Turns an [`AddressRecord`] into a validated host/port pair. A parser
//! returns `Ok(None)` when the tag is not its own, so several transports can
//! be tried in order against the same record.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use crate::error::{Error, Result};

use super::AddressRecord;

/// Host used when an address omits it
pub const WILDCARD_HOST: &str = "0.0.0.0";

/// Where to connect to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectInfo {
    /// Hostname or literal IP
    pub host: String,
    /// Not range-checked until the socket is created
    pub port: i32,
}

impl ConnectInfo {
    /// `host:port` form accepted by `tokio::net::lookup_host`
    pub fn target(&self) -> io::Result<(String, u16)> {
        Ok((self.host.clone(), socket_port(self.port)?))
    }
}

impl std::fmt::Display for ConnectInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Where to listen
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenInfo {
    pub bind_address: IpAddr,
    /// Not range-checked until the socket is bound
    pub port: i32,
}

impl ListenInfo {
    pub fn socket_addr(&self) -> io::Result<SocketAddr> {
        Ok(SocketAddr::new(self.bind_address, socket_port(self.port)?))
    }
}

impl std::fmt::Display for ListenInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.bind_address {
            IpAddr::V6(ip) => write!(f, "[{}]:{}", ip, self.port),
            IpAddr::V4(ip) => write!(f, "{}:{}", ip, self.port),
        }
    }
}

/// Either side of a resolved endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointInfo {
    Connect(ConnectInfo),
    Listen(ListenInfo),
}

impl std::fmt::Display for EndpointInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EndpointInfo::Connect(info) => write!(f, "connect {}", info),
            EndpointInfo::Listen(info) => write!(f, "listen {}", info),
        }
    }
}

/// Convert a parsed port to a socket port, failing as a transport error
pub fn socket_port(port: i32) -> io::Result<u16> {
    u16::try_from(port).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("port {} is out of range", port),
        )
    })
}

/// Parse connect info for `tag`, or `None` if the record carries another tag
pub fn parse_connect_info(record: &AddressRecord, tag: &str) -> Result<Option<ConnectInfo>> {
    if !record.has_tag(tag) {
        return Ok(None);
    }

    let (host, port) = split_host_port(record.text());
    let host = host.map(strip_brackets).unwrap_or(WILDCARD_HOST);

    Ok(Some(ConnectInfo {
        host: host.to_string(),
        port: parse_port(port, record)?,
    }))
}

/// Parse listen info for `tag`, or `None` if the record carries another tag.
///
/// The bind address must be a literal IP; hostnames are rejected here rather
/// than at bind time.
pub fn parse_listen_info(record: &AddressRecord, tag: &str) -> Result<Option<ListenInfo>> {
    if !record.has_tag(tag) {
        return Ok(None);
    }

    let (host, port) = split_host_port(record.text());
    let bind_address = match host {
        None => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        Some(host) => strip_brackets(host).parse().map_err(|_| {
            Error::InvalidAddress(format!(
                "listen address '{}' in '{}' is not a literal IP",
                host, record
            ))
        })?,
    };

    Ok(Some(ListenInfo {
        bind_address,
        port: parse_port(port, record)?,
    }))
}

/// Split `[host]:port` on its last colon.
///
/// No colon, or a leading colon, means the host was omitted. A bracketed
/// host with nothing after it has no port.
fn split_host_port(text: &str) -> (Option<&str>, &str) {
    if text.ends_with(']') {
        return (Some(text), "");
    }
    match text.rfind(':') {
        None | Some(0) => (None, text.trim_start_matches(':')),
        Some(idx) => (Some(&text[..idx]), &text[idx + 1..]),
    }
}

fn strip_brackets(host: &str) -> &str {
    host.strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host)
}

fn parse_port(port: &str, record: &AddressRecord) -> Result<i32> {
    port.trim()
        .parse()
        .map_err(|_| Error::InvalidPort(format!("'{}' in '{}'", port, record)))
}
