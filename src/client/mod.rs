//! Tunnel client implementation.
//!
//! This module provides the core tunnel functionality:
//! - Negotiator - Registers a tunnel with the server over HTTP
//! - Relay - Pumps bytes between the local service and the tunnel channel
//! - [`Session`] - Ties registration, connections, relay and shutdown together

mod negotiator;
mod relay;
mod session;

#[cfg(test)]
mod mock_server;

pub use negotiator::normalize_server;
pub use session::{Session, SessionConfig};
