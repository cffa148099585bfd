//! Common types and abstractions
//!
//! - AddressRecord: `TAG:ADDRESS` specification
//! - EndpointInfo: validated connect/listen targets
//! - Stream: unified async byte transport
//! - Pipe: bidirectional relay between two endpoints

mod address;
pub mod blocking;
pub mod endpoint;
pub mod pipe;
mod stream;

pub use address::AddressRecord;
pub use endpoint::{ConnectInfo, EndpointInfo, ListenInfo, WILDCARD_HOST};
pub use pipe::{relay, RelayStats};
pub use stream::{ByteTransport, Stream};

// Re-export error types from crate root
pub use crate::error::{Error, Result};
