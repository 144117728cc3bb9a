//! WebSocket accept loop for board subscriptions.
//!
//! ```text
//! GET /ws/board/{id}?token=…          (or Authorization: Bearer …)
//!        │
//!        ├─ bad id ───────────► 400
//!        ├─ no credential ────► 401
//!        ▼
//!   upgrade ──► Admission::admit ──deny──► close 1008, no registration
//!                     │
//!                     ▼ allow
//!              Hub::register ──► Connection::serve
//! ```

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use futures_util::SinkExt;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{header, StatusCode};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

use kanban_core::BoardId;

use crate::admission::{Admission, AdmissionError};
use crate::connection::{Connection, ConnectionConfig};
use crate::hub::HubHandle;

const BOARD_PATH: &str = "/ws/board/";

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    pub connection: ConnectionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            connection: ConnectionConfig::default(),
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    /// Upgrades refused at the handshake or by admission.
    pub rejected: u64,
}

#[derive(Default)]
struct AtomicServerStats {
    total_connections: AtomicU64,
    active_connections: AtomicU64,
    rejected: AtomicU64,
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("accept failed: {0}")]
    Accept(#[source] std::io::Error),
}

/// Parsed subscription target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardRequest {
    pub board: BoardId,
    pub credential: String,
}

/// Why an upgrade request was refused before the handshake completed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HandshakeRejection {
    #[error("no board route at {0}")]
    UnknownPath(String),

    #[error("invalid board id {0:?}")]
    InvalidBoardId(String),

    #[error("missing credential")]
    MissingCredential,
}

impl HandshakeRejection {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::UnknownPath(_) => StatusCode::NOT_FOUND,
            Self::InvalidBoardId(_) => StatusCode::BAD_REQUEST,
            Self::MissingCredential => StatusCode::UNAUTHORIZED,
        }
    }

    fn into_response(self) -> ErrorResponse {
        let mut response = ErrorResponse::new(Some(self.to_string()));
        *response.status_mut() = self.status();
        response
    }
}

/// Extract the board id and bearer credential from an upgrade request.
///
/// The `token` query parameter wins over the `Authorization` header.
pub fn parse_board_request(request: &Request) -> Result<BoardRequest, HandshakeRejection> {
    let path = request.uri().path();
    let raw_id = path
        .strip_prefix(BOARD_PATH)
        .ok_or_else(|| HandshakeRejection::UnknownPath(path.to_string()))?;
    let board = raw_id
        .trim_end_matches('/')
        .parse::<BoardId>()
        .map_err(|_| HandshakeRejection::InvalidBoardId(raw_id.to_string()))?;

    let from_query = request
        .uri()
        .query()
        .into_iter()
        .flat_map(|q| q.split('&'))
        .find_map(|pair| pair.strip_prefix("token="))
        .filter(|token| !token.is_empty());

    let from_header = || {
        request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.strip_prefix("Bearer ").unwrap_or(value).trim())
            .filter(|token| !token.is_empty())
    };

    let credential = from_query
        .or_else(from_header)
        .ok_or(HandshakeRejection::MissingCredential)?;

    Ok(BoardRequest {
        board,
        credential: credential.to_string(),
    })
}

/// The board subscription server.
pub struct BoardServer {
    config: ServerConfig,
    hub: HubHandle,
    admission: Arc<dyn Admission>,
    stats: Arc<AtomicServerStats>,
}

impl BoardServer {
    pub fn new(config: ServerConfig, hub: HubHandle, admission: Arc<dyn Admission>) -> Self {
        Self {
            config,
            hub,
            admission,
            stats: Arc::new(AtomicServerStats::default()),
        }
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn hub(&self) -> &HubHandle {
        &self.hub
    }

    /// Bind the configured address.
    pub async fn bind(&self) -> Result<TcpListener, ServerError> {
        TcpListener::bind(&self.config.bind_addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: self.config.bind_addr.clone(),
                source,
            })
    }

    /// Bind and serve until the accept loop fails.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        if let Ok(addr) = listener.local_addr() {
            log::info!("Board server listening on {addr}");
        }

        loop {
            let (stream, addr) = listener.accept().await.map_err(ServerError::Accept)?;
            log::debug!("New TCP connection from {addr}");

            let hub = self.hub.clone();
            let admission = self.admission.clone();
            let stats = self.stats.clone();
            let config = self.config.connection.clone();

            tokio::spawn(async move {
                Self::handle_connection(stream, addr, hub, admission, stats, config).await;
            });
        }
    }

    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        hub: HubHandle,
        admission: Arc<dyn Admission>,
        stats: Arc<AtomicServerStats>,
        config: ConnectionConfig,
    ) {
        let mut target = None;
        let callback = |request: &Request, response: Response| match parse_board_request(request) {
            Ok(parsed) => {
                target = Some(parsed);
                Ok(response)
            }
            Err(rejection) => {
                log::warn!("Rejected upgrade from {addr}: {rejection}");
                Err(rejection.into_response())
            }
        };

        let handshake = tokio_tungstenite::accept_hdr_async_with_config(
            stream,
            callback,
            Some(config.websocket_config()),
        )
        .await;

        // The callback fills `target` whenever it accepts the upgrade.
        let (mut ws, target) = match (handshake, target) {
            (Ok(ws), Some(target)) => (ws, target),
            (handshake, _) => {
                stats.rejected.fetch_add(1, Ordering::Relaxed);
                if let Err(e) = handshake {
                    log::debug!("Handshake with {addr} failed: {e}");
                }
                return;
            }
        };

        let board = target.board;
        let user = match admission.admit(board, &target.credential).await {
            Ok(user) => user,
            Err(e) => {
                stats.rejected.fetch_add(1, Ordering::Relaxed);
                log::warn!("Board {board} subscription from {addr} refused: {e}");
                refuse(&mut ws, &e).await;
                return;
            }
        };

        let (subscriber, outbound) = hub.subscriber(board, user);
        let connection = Connection::new(&subscriber, hub.clone(), config);
        stats.total_connections.fetch_add(1, Ordering::Relaxed);
        stats.active_connections.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = hub.register(subscriber).await {
            log::error!("Cannot register board {board}, user {user}: {e}");
            stats.active_connections.fetch_sub(1, Ordering::Relaxed);
            let _ = ws.close(None).await;
            return;
        }
        log::info!("WebSocket connection established: board {board}, user {user} from {addr}");

        if let Err(e) = connection.serve(ws, outbound).await {
            log::debug!("Connection from {addr} ended: {e}");
        }
        stats.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    /// Get server statistics.
    pub fn stats(&self) -> ServerStats {
        ServerStats {
            total_connections: self.stats.total_connections.load(Ordering::Relaxed),
            active_connections: self.stats.active_connections.load(Ordering::Relaxed),
            rejected: self.stats.rejected.load(Ordering::Relaxed),
        }
    }
}

async fn refuse<S>(ws: &mut tokio_tungstenite::WebSocketStream<S>, reason: &AdmissionError)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let frame = CloseFrame {
        code: CloseCode::from(reason.close_code()),
        reason: reason.to_string().into(),
    };
    if let Err(e) = ws.send(Message::Close(Some(frame))).await {
        log::debug!("Close frame not delivered: {e}");
    }
}
