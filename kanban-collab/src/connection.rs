//! One admitted WebSocket bound to one board and one user.
//!
//! Two duties share the socket:
//!
//! - **write**: spawned task; forwards the hub's outbound queue as text
//!   frames, pings every `ping_period`, sends a close frame once the hub
//!   drops the queue. Each send must finish within `write_wait`.
//! - **read**: runs in place; only watches for liveness. The deadline moves
//!   forward on every pong, inbound payloads are discarded.
//!
//! Whichever duty ends first ends the connection, and the connection always
//! asks the hub to unregister it on the way out.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::WebSocketStream;

use kanban_core::{BoardId, UserId};

use crate::hub::{ConnectionId, HubHandle, Subscriber};

/// Per-connection timing and limits.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Deadline for a single frame write.
    pub write_wait: Duration,
    /// How long the peer may stay silent before the connection is dropped.
    pub pong_wait: Duration,
    /// Must be shorter than `pong_wait`.
    pub ping_period: Duration,
    /// Largest inbound message accepted, in bytes.
    pub max_message_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::with_pong_wait(Duration::from_secs(60))
    }
}

impl ConnectionConfig {
    /// Defaults with `ping_period` at 90% of `pong_wait`.
    pub fn with_pong_wait(pong_wait: Duration) -> Self {
        Self {
            write_wait: Duration::from_secs(10),
            pong_wait,
            ping_period: pong_wait * 9 / 10,
            max_message_size: 512,
        }
    }

    pub fn websocket_config(&self) -> WebSocketConfig {
        WebSocketConfig::default()
            .max_message_size(Some(self.max_message_size))
            .max_frame_size(Some(self.max_message_size))
    }
}

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("write did not finish within {0:?}")]
    WriteTimeout(Duration),

    #[error("peer silent for {0:?}")]
    ReadTimeout(Duration),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("write duty aborted: {0}")]
    WriterAborted(String),
}

/// A registered subscriber's socket side.
pub struct Connection {
    id: ConnectionId,
    board: BoardId,
    user: UserId,
    hub: HubHandle,
    config: ConnectionConfig,
}

impl Connection {
    pub fn new(subscriber: &Subscriber, hub: HubHandle, config: ConnectionConfig) -> Self {
        Self {
            id: subscriber.id(),
            board: subscriber.board(),
            user: subscriber.user(),
            hub,
            config,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Run both duties until the connection ends.
    ///
    /// `outbound` must be the receiver paired with the registered subscriber.
    pub async fn serve<S>(
        self,
        ws: WebSocketStream<S>,
        outbound: mpsc::Receiver<Arc<str>>,
    ) -> Result<(), ConnectionError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, mut stream) = ws.split();
        let mut writer = tokio::spawn(write_duty(sink, outbound, self.config.clone()));

        let result = tokio::select! {
            read = read_duty(&mut stream, self.config.pong_wait) => {
                self.leave().await;
                // The hub dropping our queue lets the writer send its close frame.
                if tokio::time::timeout(self.config.write_wait, &mut writer).await.is_err() {
                    writer.abort();
                }
                read
            }
            write = &mut writer => {
                self.leave().await;
                write.unwrap_or_else(|e| Err(ConnectionError::WriterAborted(e.to_string())))
            }
        };

        match &result {
            Ok(()) => log::debug!(
                "Connection closed: board {}, user {}",
                self.board,
                self.user
            ),
            Err(e) => log::debug!(
                "Connection dropped: board {}, user {}: {e}",
                self.board,
                self.user
            ),
        }
        result
    }

    async fn leave(&self) {
        if let Err(e) = self.hub.unregister(self.board, self.id).await {
            log::debug!(
                "Unregister for board {}, user {} skipped: {e}",
                self.board,
                self.user
            );
        }
    }
}

async fn write_duty<S>(
    mut sink: SplitSink<WebSocketStream<S>, Message>,
    mut outbound: mpsc::Receiver<Arc<str>>,
    config: ConnectionConfig,
) -> Result<(), ConnectionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut ping = tokio::time::interval_at(Instant::now() + config.ping_period, config.ping_period);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            next = outbound.recv() => match next {
                Some(payload) => {
                    send_within(&mut sink, Message::Text(payload.to_string().into()), config.write_wait).await?;
                }
                None => {
                    // Queue closed by the hub: say goodbye, best effort.
                    let _ = send_within(&mut sink, Message::Close(None), config.write_wait).await;
                    let _ = sink.close().await;
                    return Ok(());
                }
            },
            _ = ping.tick() => {
                send_within(&mut sink, Message::Ping(Default::default()), config.write_wait).await?;
            }
        }
    }
}

async fn send_within<S>(
    sink: &mut SplitSink<WebSocketStream<S>, Message>,
    message: Message,
    wait: Duration,
) -> Result<(), ConnectionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match tokio::time::timeout(wait, sink.send(message)).await {
        Ok(sent) => Ok(sent?),
        Err(_) => Err(ConnectionError::WriteTimeout(wait)),
    }
}

async fn read_duty<S>(
    stream: &mut SplitStream<WebSocketStream<S>>,
    pong_wait: Duration,
) -> Result<(), ConnectionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut deadline = Instant::now() + pong_wait;
    loop {
        match tokio::time::timeout_at(deadline, stream.next()).await {
            Err(_) => return Err(ConnectionError::ReadTimeout(pong_wait)),
            Ok(None) | Ok(Some(Ok(Message::Close(_)))) => return Ok(()),
            Ok(Some(Ok(Message::Pong(_)))) => deadline = Instant::now() + pong_wait,
            Ok(Some(Ok(_))) => {}
            Ok(Some(Err(tungstenite::Error::ConnectionClosed))) => return Ok(()),
            Ok(Some(Err(e))) => return Err(e.into()),
        }
    }
}
