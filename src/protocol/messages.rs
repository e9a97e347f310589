use serde::{Deserialize, Serialize};
use std::fmt;

use super::TunnelId;

/// Protocol the server should expose the tunnel as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Http,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Http => write!(f, "http"),
        }
    }
}

/// Registration payload (Client -> Server)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TunnelRequest {
    pub protocol: Protocol,
    pub local_port: u16,
    pub local_host: String,
    pub token: String,
}

impl TunnelRequest {
    pub fn new(protocol: Protocol, local_host: &str, local_port: u16, token: &str) -> Self {
        TunnelRequest {
            protocol,
            local_port,
            local_host: local_host.to_string(),
            token: token.to_string(),
        }
    }
}

/// A tunnel registered by the server (Server -> Client)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TunnelDescriptor {
    #[serde(rename = "tunnel_id")]
    pub id: TunnelId,
    pub remote_port: u16,
    pub public_url: String,
}

impl TunnelDescriptor {
    /// Decode a registration response, rejecting descriptors without an id.
    pub fn from_json(json: &str) -> Result<Self, String> {
        let descriptor: TunnelDescriptor =
            serde_json::from_str(json).map_err(|e| format!("invalid tunnel response: {}", e))?;

        if descriptor.id.is_empty() {
            return Err("tunnel response has an empty tunnel_id".to_string());
        }

        Ok(descriptor)
    }
}
