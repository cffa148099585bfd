//! netpipe - relay bytes between two endpoints
//!
//! # Architecture
//!
//! ```text
//! "TAG:ADDRESS"
//! → AddressRecord
//! → StrategyRegistry (resolver per transport)
//! → PiperStrategy / ListenPiperStrategy
//! → Piper (byte stream over TCP or UDP)
//! → relay
//! ```
//!
//! ## Core Principles
//!
//! - Resolution validates text only, sockets come later
//! - Every transport is read and written as a byte stream
//! - UDP listeners serve exactly one session
//!
//! ## Module Structure
//!
//! ```text
//! src/
//! ├── common/          # Core types: AddressRecord, EndpointInfo, Stream, relay
//! ├── transport/       # Transport layer: TCP, UDP peer/stream/listener
//! ├── strategy/        # Address resolution into endpoint strategies
//! └── app/             # Application: Runtime, metrics
//! ```

// Core types
pub mod common;
pub mod error;

// Layered architecture
pub mod transport;
pub mod strategy;
pub mod app;

// Supporting modules
pub mod config;
pub use app::metrics;

// Re-exports for convenience
pub use common::{AddressRecord, EndpointInfo, RelayStats, Stream};
pub use error::{Error, Result};
pub use config::Config;

// Architecture re-exports
pub use app::Runtime;
pub use strategy::{ResolvedEndpoint, StrategyRegistry};
pub use transport::{ListenPiper, Piper};
