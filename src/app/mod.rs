//! Application Layer
//!
//! This module contains:
//! - Runtime: resolves two addresses and relays one session between them
//! - Metrics: Prometheus counters for datagrams, sessions and relayed bytes

pub mod metrics;
mod runtime;

pub use runtime::Runtime;
