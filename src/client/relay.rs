//! Bidirectional relay between the local service and the tunnel channel.
//!
//! Two pumps run as separate tasks:
//! - local -> remote: each read from the local socket becomes one binary frame
//! - remote -> local: each data frame is written in full to the local socket
//!
//! A pump that stops does not stop its sibling. Both observe a shared
//! [`CancellationToken`], which is how the session tears the relay down.
//! The outbound task keeps the channel until teardown and then sends a close
//! frame, whichever way its pump stopped.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::fmt;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Largest chunk read from the local socket per frame
pub const CHUNK_SIZE: usize = 1024;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    LocalToRemote,
    RemoteToLocal,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::LocalToRemote => write!(f, "local->remote"),
            Direction::RemoteToLocal => write!(f, "remote->local"),
        }
    }
}

/// Why a pump stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PumpExit {
    /// The source side closed
    Eof,
    /// The relay was cancelled
    Cancelled,
    /// A read or write failed
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct PumpOutcome {
    pub direction: Direction,
    pub exit: PumpExit,
    pub bytes: u64,
    pub frames: u64,
}

impl PumpOutcome {
    fn new(direction: Direction) -> Self {
        Self {
            direction,
            exit: PumpExit::Eof,
            bytes: 0,
            frames: 0,
        }
    }

    fn record(&mut self, len: usize) {
        self.bytes += len as u64;
        self.frames += 1;
    }

    fn finish(mut self, exit: PumpExit) -> Self {
        match &exit {
            PumpExit::Failed(reason) => warn!(
                direction = %self.direction,
                bytes = self.bytes,
                frames = self.frames,
                "Pump failed: {}",
                reason
            ),
            _ => debug!(
                direction = %self.direction,
                bytes = self.bytes,
                frames = self.frames,
                "Pump stopped: {:?}",
                exit
            ),
        }
        self.exit = exit;
        self
    }

    fn lost(direction: Direction) -> Self {
        Self {
            direction,
            exit: PumpExit::Failed("pump task ended without reporting".to_string()),
            bytes: 0,
            frames: 0,
        }
    }
}

/// Final state of both pumps
#[derive(Debug, Clone)]
pub struct RelayReport {
    pub local_to_remote: PumpOutcome,
    pub remote_to_local: PumpOutcome,
}

impl RelayReport {
    fn from_outcomes(outcomes: Vec<PumpOutcome>) -> Self {
        let mut local_to_remote = None;
        let mut remote_to_local = None;
        for outcome in outcomes {
            match outcome.direction {
                Direction::LocalToRemote => local_to_remote = Some(outcome),
                Direction::RemoteToLocal => remote_to_local = Some(outcome),
            }
        }

        Self {
            local_to_remote: local_to_remote
                .unwrap_or_else(|| PumpOutcome::lost(Direction::LocalToRemote)),
            remote_to_local: remote_to_local
                .unwrap_or_else(|| PumpOutcome::lost(Direction::RemoteToLocal)),
        }
    }

    pub fn log(&self) {
        for outcome in [&self.local_to_remote, &self.remote_to_local] {
            info!(
                direction = %outcome.direction,
                bytes = outcome.bytes,
                frames = outcome.frames,
                "Relay finished: {:?}",
                outcome.exit
            );
        }
    }
}

/// A local byte stream paired with a remote frame channel
pub struct Relay<L, R> {
    local: L,
    remote: R,
}

impl<L, R> Relay<L, R>
where
    L: AsyncRead + AsyncWrite + Send + 'static,
    R: Sink<Message, Error = WsError> + Stream<Item = Result<Message, WsError>> + Send + 'static,
{
    pub fn new(local: L, remote: R) -> Self {
        Self { local, remote }
    }

    /// Start both pumps. They run until their source closes, an I/O error
    /// occurs, or `cancel` fires.
    pub fn spawn(self, cancel: CancellationToken) -> RelayHandle {
        let (local_read, local_write) = tokio::io::split(self.local);
        let (remote_sink, remote_stream): (SplitSink<R, Message>, SplitStream<R>) =
            self.remote.split();
        let (exit_tx, exit_rx) = mpsc::channel::<PumpOutcome>(2);

        let outbound = {
            let cancel = cancel.clone();
            let exit_tx = exit_tx.clone();
            tokio::spawn(async move {
                let mut sink = remote_sink;
                let outcome = pump_local_to_remote(local_read, &mut sink, &cancel).await;
                let _ = exit_tx.send(outcome).await;
                drop(exit_tx);

                // Inbound frames may still arrive after a local EOF.
                cancel.cancelled().await;
                close_channel(&mut sink).await;
            })
        };

        let inbound = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let outcome = pump_remote_to_local(remote_stream, local_write, cancel).await;
                let _ = exit_tx.send(outcome).await;
            })
        };

        RelayHandle {
            cancel,
            exits: exit_rx,
            finished: Vec::with_capacity(2),
            tasks: vec![outbound, inbound],
        }
    }
}

/// Handle to a running relay
pub struct RelayHandle {
    cancel: CancellationToken,
    exits: mpsc::Receiver<PumpOutcome>,
    finished: Vec<PumpOutcome>,
    tasks: Vec<JoinHandle<()>>,
}

impl RelayHandle {
    /// Wait for the next pump to stop. `None` once both have stopped.
    pub async fn next_exit(&mut self) -> Option<Direction> {
        let outcome = self.exits.recv().await?;
        let direction = outcome.direction;
        self.finished.push(outcome);
        Some(direction)
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for both pumps, close the channel and collect their outcomes.
    pub async fn join(mut self) -> RelayReport {
        while self.next_exit().await.is_some() {}
        self.cancel.cancel();

        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!("Relay task did not finish cleanly: {}", e);
            }
        }

        RelayReport::from_outcomes(std::mem::take(&mut self.finished))
    }
}

async fn pump_local_to_remote<Rd, Sk>(
    mut reader: Rd,
    sink: &mut Sk,
    cancel: &CancellationToken,
) -> PumpOutcome
where
    Rd: AsyncRead + Unpin,
    Sk: Sink<Message, Error = WsError> + Unpin,
{
    let mut outcome = PumpOutcome::new(Direction::LocalToRemote);
    let mut buf = [0u8; CHUNK_SIZE];

    loop {
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            read = reader.read(&mut buf) => Some(read),
        };

        let n = match read {
            None => return outcome.finish(PumpExit::Cancelled),
            Some(Ok(0)) => return outcome.finish(PumpExit::Eof),
            Some(Ok(n)) => n,
            Some(Err(e)) => return outcome.finish(PumpExit::Failed(format!("read: {}", e))),
        };

        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            sent = sink.send(Message::Binary(buf[..n].to_vec())) => Some(sent),
        };

        match sent {
            None => return outcome.finish(PumpExit::Cancelled),
            Some(Ok(())) => outcome.record(n),
            Some(Err(e)) => return outcome.finish(PumpExit::Failed(format!("write: {}", e))),
        }
    }
}

/// Tell the server the tunnel is going away. Returns whether the frame went out.
async fn close_channel<Sk>(sink: &mut Sk) -> bool
where
    Sk: Sink<Message, Error = WsError> + Unpin,
{
    match tokio::time::timeout(CLOSE_TIMEOUT, sink.send(Message::Close(None))).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            debug!("Failed to send close frame: {}", e);
            false
        }
        Err(_) => {
            debug!("Timed out sending close frame");
            false
        }
    }
}

async fn pump_remote_to_local<St, Wr>(
    mut stream: St,
    mut writer: Wr,
    cancel: CancellationToken,
) -> PumpOutcome
where
    St: Stream<Item = Result<Message, WsError>> + Unpin,
    Wr: AsyncWrite + Unpin,
{
    let mut outcome = PumpOutcome::new(Direction::RemoteToLocal);

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return outcome.finish(PumpExit::Cancelled),
            next = stream.next() => next,
        };

        let payload = match next {
            None => return outcome.finish(PumpExit::Eof),
            Some(Ok(Message::Binary(data))) => data,
            Some(Ok(Message::Text(text))) => text.into_bytes(),
            Some(Ok(Message::Close(frame))) => {
                debug!(
                    "Server closed channel: {:?}",
                    frame.map(|f| f.reason.to_string())
                );
                return outcome.finish(PumpExit::Eof);
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return outcome.finish(PumpExit::Failed(format!("read: {}", e))),
        };

        let written = tokio::select! {
            biased;
            _ = cancel.cancelled() => return outcome.finish(PumpExit::Cancelled),
            written = write_frame(&mut writer, &payload) => written,
        };

        match written {
            Ok(()) => outcome.record(payload.len()),
            Err(e) => return outcome.finish(PumpExit::Failed(format!("write: {}", e))),
        }
    }
}

async fn write_frame<Wr>(writer: &mut Wr, payload: &[u8]) -> std::io::Result<()>
where
    Wr: AsyncWrite + Unpin,
{
    writer.write_all(payload).await?;
    writer.flush().await
}
