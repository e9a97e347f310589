use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use crate::error::{Result, TunnelError};
use crate::protocol::{TunnelDescriptor, TunnelId, TunnelRequest};

const CONNECT_PATH: &str = "/api/tunnel/connect";
const WS_PATH: &str = "/api/tunnel/ws";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Parse a server address, assuming `http://` when no scheme is given.
pub fn normalize_server(server: &str) -> Result<Url> {
    let server = server.trim().trim_end_matches('/');
    let with_scheme = if server.starts_with("http://") || server.starts_with("https://") {
        server.to_string()
    } else {
        format!("http://{}", server)
    };

    let url = Url::parse(&with_scheme)
        .map_err(|e| TunnelError::InvalidServer(format!("{}: {}", server, e)))?;
    if url.host_str().is_none() {
        return Err(TunnelError::InvalidServer(server.to_string()));
    }
    Ok(url)
}

/// Registers tunnels with the server over plain HTTP.
pub struct Negotiator {
    client: Client,
    server: Url,
}

impl Negotiator {
    pub fn new(server: &str) -> Result<Self> {
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            server: normalize_server(server)?,
        })
    }

    /// Register a tunnel. A single attempt; nothing is retried.
    pub async fn register(&self, request: &TunnelRequest) -> Result<TunnelDescriptor> {
        let url = self.endpoint(CONNECT_PATH);
        info!(
            "Registering {} tunnel for {}:{} with {}",
            request.protocol, request.local_host, request.local_port, url
        );

        let response = self.client.post(url).json(request).send().await?;

        let status = response.status();
        let body = response.text().await?;
        debug!("Registration response {}: {}", status, body);

        if !status.is_success() {
            return Err(TunnelError::Registration {
                status: status.as_u16(),
                body,
            });
        }

        let descriptor = TunnelDescriptor::from_json(&body).map_err(TunnelError::Protocol)?;
        info!(tunnel_id = %descriptor.id, remote_port = descriptor.remote_port, "Tunnel registered");
        Ok(descriptor)
    }

    /// Address of the duplex channel for a registered tunnel.
    pub fn ws_url(&self, tunnel_id: &TunnelId) -> Result<Url> {
        let mut url = self.server.clone();
        let scheme = match url.scheme() {
            "https" => "wss",
            _ => "ws",
        };
        url.set_scheme(scheme)
            .map_err(|_| TunnelError::InvalidServer(self.server.to_string()))?;
        url.set_path(&self.joined_path(WS_PATH));
        url.query_pairs_mut()
            .clear()
            .append_pair("tunnel_id", tunnel_id.as_str());
        Ok(url)
    }

    fn endpoint(&self, path: &str) -> Url {
        let mut url = self.server.clone();
        url.set_path(&self.joined_path(path));
        url.set_query(None);
        url
    }

    fn joined_path(&self, path: &str) -> String {
        format!("{}{}", self.server.path().trim_end_matches('/'), path)
    }
}
