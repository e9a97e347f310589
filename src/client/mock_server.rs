//! In-process tunnel server for tests.
//!
//! Serves `POST /api/tunnel/connect` with a canned answer and, when asked,
//! `GET /api/tunnel/ws` as a WebSocket upgrade. Every registration body and
//! every opened channel is handed back to the test over a channel.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use std::collections::HashMap;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

#[derive(Clone)]
struct MockState {
    status: StatusCode,
    body: &'static str,
    registrations: mpsc::UnboundedSender<serde_json::Value>,
    channels: mpsc::UnboundedSender<(String, WebSocket)>,
}

pub struct MockServer {
    pub url: String,
    /// JSON bodies posted to the registration endpoint
    pub registrations: mpsc::UnboundedReceiver<serde_json::Value>,
    /// Upgraded channels, with the `tunnel_id` they were opened for
    pub channels: mpsc::UnboundedReceiver<(String, WebSocket)>,
}

impl MockServer {
    /// Answer every registration with `status` and `body`. There is no
    /// channel route, so dialing it fails with 404.
    pub async fn registration_only(status: u16, body: &'static str) -> Self {
        Self::start(status, body, false).await
    }

    /// Accept registrations with `body` and upgrade channel requests.
    pub async fn with_channel(body: &'static str) -> Self {
        Self::start(200, body, true).await
    }

    async fn start(status: u16, body: &'static str, channel: bool) -> Self {
        let (registrations_tx, registrations) = mpsc::unbounded_channel();
        let (channels_tx, channels) = mpsc::unbounded_channel();
        let state = MockState {
            status: StatusCode::from_u16(status).unwrap(),
            body,
            registrations: registrations_tx,
            channels: channels_tx,
        };

        let mut app: Router<MockState> =
            Router::new().route("/api/tunnel/connect", post(register));
        if channel {
            app = app.route("/api/tunnel/ws", get(open_channel));
        }
        let app = app.with_state(state);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            url: format!("http://{}", addr),
            registrations,
            channels,
        }
    }
}

async fn register(
    State(state): State<MockState>,
    Json(body): Json<serde_json::Value>,
) -> (StatusCode, &'static str) {
    let _ = state.registrations.send(body);
    (state.status, state.body)
}

async fn open_channel(
    State(state): State<MockState>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    let tunnel_id = params.get("tunnel_id").cloned().unwrap_or_default();
    ws.on_upgrade(move |socket| async move {
        let _ = state.channels.send((tunnel_id, socket));
    })
}

/// Next binary frame from the client, skipping control frames.
pub async fn recv_binary(socket: &mut WebSocket) -> Vec<u8> {
    loop {
        match socket.recv().await {
            Some(Ok(Message::Binary(data))) => return data.to_vec(),
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
            other => panic!("expected binary frame, got {:?}", other),
        }
    }
}

/// Whether the next non-control frame from the client is a close frame.
pub async fn recv_close(socket: &mut WebSocket) -> bool {
    loop {
        match socket.recv().await {
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
            Some(Ok(Message::Close(_))) => return true,
            _ => return false,
        }
    }
}
