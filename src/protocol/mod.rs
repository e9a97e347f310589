//! Wire types for tunnel registration.
//!
//! Defines the JSON payloads exchanged with the registration endpoint:
//! - [`TunnelRequest`] - Sent from client to server
//! - [`TunnelDescriptor`] - Returned by the server for a registered tunnel
//!
//! Relayed payload bytes travel as raw binary WebSocket frames and have no
//! envelope of their own.

mod ids;
mod messages;

pub use ids::*;
pub use messages::*;
