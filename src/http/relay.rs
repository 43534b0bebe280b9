//! Bidirectional WebSocket relay.
//!
//! # Data Flow
//! ```text
//!            ┌── relay task (client → upstream) ──┐
//! client ────┤                                     ├──── upstream
//!            └── relay task (upstream → client) ──┘
//!                        │ first Completion wins
//!                        ▼
//!                  session owner
//! ```
//!
//! Each task owns the read half of its source and the write half of its
//! destination. Text and binary messages are forwarded in receipt order;
//! ping/pong stay with the transport that received them. Whichever task
//! finishes first decides the session's termination cause, and the other
//! task is aborted when the owner returns.

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{
    self,
    error::ProtocolError,
    protocol::{frame::coding::CloseCode, CloseFrame},
};

use axum::body::Bytes;
use axum::extract::ws;

/// RFC 6455 normal closure.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Close frame payloads are limited to 125 bytes, two of them the code.
pub const MAX_CLOSE_REASON: usize = 123;

/// Code and reason carried by a close frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub code: u16,
    pub reason: String,
}

impl CloseReason {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        let mut reason = reason.into();
        if reason.len() > MAX_CLOSE_REASON {
            let mut end = MAX_CLOSE_REASON;
            while !reason.is_char_boundary(end) {
                end -= 1;
            }
            reason.truncate(end);
        }
        Self { code, reason }
    }

    pub fn normal(reason: impl Into<String>) -> Self {
        Self::new(NORMAL_CLOSURE, reason)
    }

    /// Whether the code may appear on the wire. 1005, 1006 and 1015 are
    /// reserved for local reporting.
    pub fn is_sendable(&self) -> bool {
        matches!(self.code, 1000..=1003 | 1007..=1014 | 3000..=4999)
    }
}

/// Message read from one leg, in leg-independent form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Data(Outbound),
    Close(Option<CloseReason>),
    /// Ping, pong or raw frames; answered by the transport, never relayed.
    Control,
}

/// Message written to one leg.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Binary(Bytes),
    Close(CloseReason),
}

impl From<ws::Message> for Inbound {
    fn from(message: ws::Message) -> Self {
        match message {
            ws::Message::Text(text) => Inbound::Data(Outbound::Text(text.as_str().to_owned())),
            ws::Message::Binary(data) => Inbound::Data(Outbound::Binary(data)),
            ws::Message::Close(frame) => Inbound::Close(
                frame.map(|f| CloseReason::new(f.code, f.reason.as_str().to_owned())),
            ),
            ws::Message::Ping(_) | ws::Message::Pong(_) => Inbound::Control,
        }
    }
}

impl From<Outbound> for ws::Message {
    fn from(message: Outbound) -> Self {
        match message {
            Outbound::Text(text) => ws::Message::Text(text.into()),
            Outbound::Binary(data) => ws::Message::Binary(data),
            Outbound::Close(close) => ws::Message::Close(Some(ws::CloseFrame {
                code: close.code,
                reason: close.reason.into(),
            })),
        }
    }
}

impl From<tungstenite::Message> for Inbound {
    fn from(message: tungstenite::Message) -> Self {
        match message {
            tungstenite::Message::Text(text) => {
                Inbound::Data(Outbound::Text(text.as_str().to_owned()))
            }
            tungstenite::Message::Binary(data) => Inbound::Data(Outbound::Binary(data)),
            tungstenite::Message::Close(frame) => Inbound::Close(
                frame.map(|f| CloseReason::new(u16::from(f.code), f.reason.as_str().to_owned())),
            ),
            tungstenite::Message::Ping(_)
            | tungstenite::Message::Pong(_)
            | tungstenite::Message::Frame(_) => Inbound::Control,
        }
    }
}

impl From<Outbound> for tungstenite::Message {
    fn from(message: Outbound) -> Self {
        match message {
            Outbound::Text(text) => tungstenite::Message::Text(text.into()),
            Outbound::Binary(data) => tungstenite::Message::Binary(data),
            Outbound::Close(close) => tungstenite::Message::Close(Some(CloseFrame {
                code: CloseCode::from(close.code),
                reason: close.reason.into(),
            })),
        }
    }
}

/// Read or write failure on one leg.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error(transparent)]
    WebSocket(#[from] tungstenite::Error),

    /// Client-leg error recognised as a close without handshake.
    #[error("{0}")]
    AbnormalClose(String),

    #[error("{0}")]
    Transport(String),
}

/// Display texts of the tungstenite errors that mean the peer went away.
const ABNORMAL_CLOSE_MESSAGES: [&str; 3] = [
    "Connection closed normally",
    "Trying to work with closed connection",
    "Connection reset without closing handshake",
];

// axum wraps its own tungstenite release, so the client leg's errors are
// recognised by io kind or by message rather than by type.
fn closed_without_handshake(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            if is_vanished_peer(io) {
                return true;
            }
        }
        let text = e.to_string();
        if ABNORMAL_CLOSE_MESSAGES.iter().any(|m| text.contains(m)) {
            return true;
        }
        current = e.source();
    }
    false
}

fn is_vanished_peer(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::UnexpectedEof | std::io::ErrorKind::ConnectionReset
    )
}

impl From<axum::Error> for RelayError {
    fn from(err: axum::Error) -> Self {
        match err.into_inner().downcast::<tungstenite::Error>() {
            Ok(inner) => RelayError::WebSocket(*inner),
            Err(other) if closed_without_handshake(&*other) => {
                RelayError::AbnormalClose(other.to_string())
            }
            Err(other) => RelayError::Transport(other.to_string()),
        }
    }
}

impl RelayError {
    /// The peer vanished without a close handshake (close code 1006).
    pub fn is_abnormal_close(&self) -> bool {
        match self {
            RelayError::AbnormalClose(_)
            | RelayError::WebSocket(tungstenite::Error::ConnectionClosed)
            | RelayError::WebSocket(tungstenite::Error::AlreadyClosed)
            | RelayError::WebSocket(tungstenite::Error::Protocol(
                ProtocolError::ResetWithoutClosingHandshake,
            )) => true,
            RelayError::WebSocket(tungstenite::Error::Io(e)) => is_vanished_peer(e),
            _ => false,
        }
    }
}

/// Why one relay direction stopped.
#[derive(Debug)]
pub enum Termination {
    /// The source sent a close frame.
    Closed(Option<CloseReason>),
    /// The source stream ended.
    Disconnected,
    ReadFailed(RelayError),
    WriteFailed(RelayError),
}

impl Termination {
    /// Close-code terminations, clean or abnormal, are a normal session end.
    pub fn is_normal(&self) -> bool {
        match self {
            Termination::Closed(_) | Termination::Disconnected => true,
            Termination::ReadFailed(err) => err.is_abnormal_close(),
            Termination::WriteFailed(_) => false,
        }
    }
}

impl std::fmt::Display for Termination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Termination::Closed(Some(close)) => {
                write!(f, "closed with {} '{}'", close.code, close.reason)
            }
            Termination::Closed(None) => write!(f, "closed without status"),
            Termination::Disconnected => write!(f, "stream ended"),
            Termination::ReadFailed(e) => write!(f, "read failed: {}", e),
            Termination::WriteFailed(e) => write!(f, "write failed: {}", e),
        }
    }
}

/// Relay direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToUpstream,
    UpstreamToClient,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::ClientToUpstream => write!(f, "client->upstream"),
            Direction::UpstreamToClient => write!(f, "upstream->client"),
        }
    }
}

/// First report from a relay task.
#[derive(Debug)]
pub struct Completion {
    pub direction: Direction,
    pub termination: Termination,
}

/// Copy messages from `source` to `sink` until either side fails.
///
/// A read failure is turned into a close frame on `sink`: the peer's own
/// code when it sent a usable one, normal closure otherwise. A write failure
/// ends the relay without further writes.
pub async fn relay<R, W, I, O, E>(mut source: R, mut sink: W) -> Termination
where
    R: Stream<Item = Result<I, E>> + Unpin,
    E: Into<RelayError>,
    I: Into<Inbound>,
    W: Sink<O> + Unpin,
    W::Error: Into<RelayError>,
    O: From<Outbound>,
{
    loop {
        let inbound = match source.next().await {
            Some(Ok(message)) => message.into(),
            Some(Err(err)) => {
                let err = err.into();
                let close = CloseReason::normal(err.to_string());
                let _ = sink.send(O::from(Outbound::Close(close))).await;
                return Termination::ReadFailed(err);
            }
            None => {
                let close = CloseReason::normal("connection closed");
                let _ = sink.send(O::from(Outbound::Close(close))).await;
                return Termination::Disconnected;
            }
        };

        match inbound {
            Inbound::Data(message) => {
                if let Err(err) = sink.send(O::from(message)).await {
                    return Termination::WriteFailed(err.into());
                }
            }
            Inbound::Control => {}
            Inbound::Close(received) => {
                let close = received
                    .clone()
                    .filter(CloseReason::is_sendable)
                    .unwrap_or_else(|| CloseReason::normal(""));
                let _ = sink.send(O::from(Outbound::Close(close))).await;
                return Termination::Closed(received);
            }
        }
    }
}

/// Aborts both relay tasks when the session owner lets go.
struct RelayTasks([JoinHandle<()>; 2]);

impl Drop for RelayTasks {
    fn drop(&mut self) {
        for task in &self.0 {
            task.abort();
        }
    }
}

fn spawn_relay<R, W, I, O, E>(
    source: R,
    sink: W,
    direction: Direction,
    done: mpsc::Sender<Completion>,
) -> JoinHandle<()>
where
    R: Stream<Item = Result<I, E>> + Unpin + Send + 'static,
    E: Into<RelayError> + Send + 'static,
    I: Into<Inbound> + Send + 'static,
    W: Sink<O> + Unpin + Send + 'static,
    W::Error: Into<RelayError>,
    O: From<Outbound> + Send + 'static,
{
    tokio::spawn(async move {
        let termination = relay(source, sink).await;
        let _ = done.send(Completion { direction, termination }).await;
    })
}

/// Relay between two connected legs until one direction finishes.
///
/// Returns the first direction's report, or `None` if both tasks died
/// without reporting. Both legs are released before this returns.
pub async fn bridge<C, U, CM, UM, CE, UE>(client: C, upstream: U) -> Option<Completion>
where
    C: Stream<Item = Result<CM, CE>> + Sink<CM, Error = CE> + Send + 'static,
    U: Stream<Item = Result<UM, UE>> + Sink<UM, Error = UE> + Send + 'static,
    CM: Into<Inbound> + From<Outbound> + Unpin + Send + 'static,
    UM: Into<Inbound> + From<Outbound> + Unpin + Send + 'static,
    CE: Into<RelayError> + Send + 'static,
    UE: Into<RelayError> + Send + 'static,
{
    let (client_sink, client_stream) = client.split::<CM>();
    let (upstream_sink, upstream_stream) = upstream.split::<UM>();
    let (done_tx, mut done_rx) = mpsc::channel(2);

    let _tasks = RelayTasks([
        spawn_relay(
            client_stream,
            upstream_sink,
            Direction::ClientToUpstream,
            done_tx.clone(),
        ),
        spawn_relay(
            upstream_stream,
            client_sink,
            Direction::UpstreamToClient,
            done_tx,
        ),
    ]);

    done_rx.recv().await
}
