use std::future::Future;
use tokio::net::TcpStream;
use tokio_tungstenite::connect_async;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::Result;
use crate::protocol::{Protocol, TunnelDescriptor, TunnelRequest};

use super::negotiator::Negotiator;
use super::relay::{Relay, RelayReport};

/// Everything a session needs, resolved once from the command line and config file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub token: String,
    pub protocol: Protocol,
    pub local_host: String,
    pub local_port: u16,
    pub server: String,
}

/// What a finished session looked like
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub descriptor: TunnelDescriptor,
    pub report: RelayReport,
}

/// One tunnel, from registration to teardown
pub struct Session {
    config: SessionConfig,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Self { config }
    }

    /// Run until SIGINT/SIGTERM, or until the relay stops on its own.
    pub async fn run(self) -> Result<SessionSummary> {
        self.run_until(shutdown_signal()).await
    }

    /// Run until `shutdown` resolves, or until the relay stops on its own.
    ///
    /// Registration and the initial connections are fatal on failure. Once
    /// relaying, the first pump to stop ends the whole session.
    pub async fn run_until<F>(self, shutdown: F) -> Result<SessionSummary>
    where
        F: Future<Output = ()>,
    {
        let config = self.config;
        let negotiator = Negotiator::new(&config.server)?;

        let request = TunnelRequest::new(
            config.protocol,
            &config.local_host,
            config.local_port,
            &config.token,
        );
        let descriptor = negotiator.register(&request).await?;

        println!("{}", banner(&descriptor));

        let ws_url = negotiator.ws_url(&descriptor.id)?;
        info!("Connecting to {}...", ws_url);
        let (remote, response) = connect_async(ws_url.as_str()).await?;
        debug!("Tunnel channel open, status: {}", response.status());

        let local = TcpStream::connect((config.local_host.as_str(), config.local_port)).await?;
        info!(
            "Connected to local service at {}:{}",
            config.local_host, config.local_port
        );

        let cancel = CancellationToken::new();
        let mut relay = Relay::new(local, remote).spawn(cancel);

        tokio::pin!(shutdown);
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown requested");
            }
            Some(direction) = relay.next_exit() => {
                info!(%direction, "Relay stopped, closing tunnel");
            }
        }

        relay.cancel();
        let report = relay.join().await;
        report.log();

        println!("\nClosing tunnel...");

        Ok(SessionSummary { descriptor, report })
    }
}

/// Line shown to the operator once the tunnel is registered.
pub fn banner(descriptor: &TunnelDescriptor) -> String {
    format!("You are tunneling to \"{}\"", descriptor.public_url)
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                debug!("SIGTERM handler unavailable: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
