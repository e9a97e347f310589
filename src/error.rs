use thiserror::Error;
use tokio_tungstenite::tungstenite;

#[derive(Error, Debug)]
pub enum TunnelError {
    #[error("Please configure token first: hixtunnel config --token YOUR_TOKEN")]
    ConfigMissing,

    #[error("Token is required")]
    TokenRequired,

    #[error("server error ({status}): {body}")]
    Registration { status: u16, body: String },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("failed to open tunnel channel: {0}")]
    Dial(#[from] tungstenite::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid server address: {0}")]
    InvalidServer(String),
}

pub type Result<T> = std::result::Result<T, TunnelError>;
