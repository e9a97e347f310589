//! Hixtunnel Client
//!
//! A CLI tool for exposing a local TCP service through a Hixtunnel server.
//!
//! The client registers a tunnel over HTTP, then relays bytes between the
//! local service and a WebSocket channel to the server until interrupted.
//! It authenticates with an auth token saved by `hixtunnel config`.

#![deny(clippy::correctness)]
#![warn(clippy::suspicious)]
#![warn(clippy::style)]
#![warn(clippy::complexity)]
#![warn(clippy::perf)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod client;
mod config;
mod error;
mod protocol;

use client::{Session, SessionConfig};
use config::Config;
use error::TunnelError;
use protocol::Protocol;

const DEFAULT_SERVER: &str = "http://localhost:8080";

#[derive(Parser, Debug)]
#[command(name = "hixtunnel")]
#[command(author, version, about = "Hixtunnel - Secure tunneling made easy")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Save your auth token
    Config(ConfigArgs),

    /// Start a tunnel to a local service
    Tunnel(TunnelArgs),
}

#[derive(Parser, Debug)]
struct ConfigArgs {
    /// Authentication token
    #[arg(long)]
    token: Option<String>,

    /// Server to use for future tunnels
    #[arg(long)]
    server: Option<String>,
}

#[derive(Parser, Debug)]
struct TunnelArgs {
    /// Protocol (tcp/http)
    #[arg(short = 'P', long, value_enum, ignore_case = true, default_value = "tcp")]
    protocol: Protocol,

    /// Local port
    #[arg(short, long, default_value = "80", value_parser = clap::value_parser!(u16).range(1..))]
    port: u16,

    /// Local host
    #[arg(short = 'H', long, default_value = "localhost")]
    host: String,

    /// Server URL
    #[arg(long, env = "HIXTUNNEL_SERVER_URL")]
    server: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Config(args) => run_config(args),
        Commands::Tunnel(args) => run_tunnel(args).await,
    }
}

fn run_config(args: ConfigArgs) -> Result<()> {
    let server = args
        .server
        .as_deref()
        .map(client::normalize_server)
        .transpose()?
        .map(|url| url.as_str().trim_end_matches('/').to_string());

    let path = Config::config_path()?;
    config::save_token(&path, args.token.as_deref().unwrap_or_default(), server.as_deref())?;

    println!("Auth token saved and ready to go..");
    Ok(())
}

async fn run_tunnel(args: TunnelArgs) -> Result<()> {
    let config = Config::load()?;
    let session_config = session_config(args, &config)?;

    let summary = Session::new(session_config)
        .run()
        .await
        .context("Tunnel failed")?;

    tracing::debug!(
        tunnel_id = %summary.descriptor.id,
        bytes_out = summary.report.local_to_remote.bytes,
        bytes_in = summary.report.remote_to_local.bytes,
        "Session finished"
    );
    Ok(())
}

/// Resolve everything the session needs. Fails before any network I/O when
/// no token has been saved.
fn session_config(args: TunnelArgs, config: &Config) -> Result<SessionConfig, TunnelError> {
    let token = config.token()?.to_string();

    let server = args
        .server
        .or_else(|| config.server.clone())
        .unwrap_or_else(|| DEFAULT_SERVER.to_string());

    Ok(SessionConfig {
        token,
        protocol: args.protocol,
        local_host: args.host,
        local_port: args.port,
        server,
    })
}

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn tunnel_args(argv: &[&str]) -> TunnelArgs {
        let cli = Cli::try_parse_from(argv).unwrap();
        match cli.command {
            Commands::Tunnel(args) => args,
            other => panic!("expected tunnel command, got {:?}", other),
        }
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_tunnel_defaults() {
        let args = tunnel_args(&["hixtunnel", "tunnel"]);
        assert_eq!(args.protocol, Protocol::Tcp);
        assert_eq!(args.port, 80);
        assert_eq!(args.host, "localhost");
    }

    #[test]
    fn test_tunnel_flags() {
        let args = tunnel_args(&[
            "hixtunnel", "tunnel", "-P", "HTTP", "-p", "3000", "-H", "127.0.0.1", "--server",
            "http://example.com:8080",
        ]);
        assert_eq!(args.protocol, Protocol::Http);
        assert_eq!(args.port, 3000);
        assert_eq!(args.host, "127.0.0.1");
        assert_eq!(args.server.as_deref(), Some("http://example.com:8080"));
    }

    #[test]
    fn test_port_zero_rejected() {
        assert!(Cli::try_parse_from(["hixtunnel", "tunnel", "--port", "0"]).is_err());
        assert!(Cli::try_parse_from(["hixtunnel", "tunnel", "--port", "70000"]).is_err());
    }

    #[test]
    fn test_missing_token_fails_before_network() {
        let args = tunnel_args(&["hixtunnel", "tunnel", "--server", "http://example.com"]);
        let err = session_config(args, &Config::default()).unwrap_err();

        assert!(matches!(err, TunnelError::ConfigMissing));
        assert_eq!(
            err.to_string(),
            "Please configure token first: hixtunnel config --token YOUR_TOKEN"
        );
    }

    #[test]
    fn test_server_resolution_order() {
        let config = Config {
            token: Some("abc".to_string()),
            server: Some("http://saved.example.com".to_string()),
        };

        let from_flag = session_config(
            tunnel_args(&["hixtunnel", "tunnel", "--server", "http://flag.example.com"]),
            &config,
        )
        .unwrap();
        assert_eq!(from_flag.server, "http://flag.example.com");
        assert_eq!(from_flag.token, "abc");

        let from_config = session_config(
            TunnelArgs {
                protocol: Protocol::Tcp,
                port: 9000,
                host: "localhost".to_string(),
                server: None,
            },
            &config,
        )
        .unwrap();
        assert_eq!(from_config.server, "http://saved.example.com");

        let fallback = session_config(
            TunnelArgs {
                protocol: Protocol::Tcp,
                port: 9000,
                host: "localhost".to_string(),
                server: None,
            },
            &Config {
                token: Some("abc".to_string()),
                server: None,
            },
        )
        .unwrap();
        assert_eq!(fallback.server, DEFAULT_SERVER);
    }

    #[test]
    fn test_server_env_sits_between_flag_and_config() {
        let config = Config {
            token: Some("abc".to_string()),
            server: Some("http://saved.example.com".to_string()),
        };

        std::env::set_var("HIXTUNNEL_SERVER_URL", "http://env.example.com");
        let without_flag = tunnel_args(&["hixtunnel", "tunnel"]);
        let with_flag =
            tunnel_args(&["hixtunnel", "tunnel", "--server", "http://flag.example.com"]);
        std::env::remove_var("HIXTUNNEL_SERVER_URL");

        let from_env = session_config(without_flag, &config).unwrap();
        assert_eq!(from_env.server, "http://env.example.com");

        let from_flag = session_config(with_flag, &config).unwrap();
        assert_eq!(from_flag.server, "http://flag.example.com");
    }
}
