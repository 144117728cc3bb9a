//! Board-scoped fan-out hub.
//!
//! A single task owns every room and drains one command queue, so
//! registration, unregistration and fan-out are totally ordered without a
//! lock on the room map:
//!
//! ```text
//! HubHandle ──┐
//! HubHandle ──┼──► mpsc<Command> ──► Hub::run ──► rooms: board → {subscriber}
//! HubHandle ──┘                                        │ try_send(Arc<str>)
//!                                                      ▼
//!                                          per-connection bounded queue
//! ```
//!
//! The hub keeps the only sender of each subscriber's outbound queue.
//! Removing a subscriber drops that sender, which closes the queue and ends
//! the connection's write duty.

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

use kanban_core::{BoardId, UserId};

use crate::event::{ChangeEvent, EventKind, MemberPresence};

/// Unique per accepted connection; a user may hold several.
pub type ConnectionId = Uuid;

/// Hub tuning.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Pending commands before `HubHandle` callers wait.
    pub command_capacity: usize,
    /// Outbound messages buffered per connection before eviction.
    pub queue_capacity: usize,
    /// Emit `member_left` when a user's last connection to a board leaves.
    pub announce_departures: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            command_capacity: 1024,
            queue_capacity: 256,
            announce_departures: true,
        }
    }
}

/// Snapshot of hub state, answered by the hub loop itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HubStats {
    pub rooms: usize,
    pub connections: usize,
    pub messages_sent: u64,
    pub evictions: u64,
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum HubError {
    #[error("hub is not running")]
    Closed,
}

/// One connection's membership in a board room.
pub struct Subscriber {
    id: ConnectionId,
    board: BoardId,
    user: UserId,
    outbound: mpsc::Sender<Arc<str>>,
}

impl Subscriber {
    /// Build a subscriber and the receiving end of its outbound queue.
    pub fn channel(
        board: BoardId,
        user: UserId,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<Arc<str>>) {
        let (outbound, rx) = mpsc::channel(capacity.max(1));
        let subscriber = Self {
            id: Uuid::new_v4(),
            board,
            user,
            outbound,
        };
        (subscriber, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn board(&self) -> BoardId {
        self.board
    }

    pub fn user(&self) -> UserId {
        self.user
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.id)
            .field("board", &self.board)
            .field("user", &self.user)
            .finish()
    }
}

enum Command {
    Register(Subscriber),
    Unregister {
        board: BoardId,
        id: ConnectionId,
    },
    Broadcast {
        board: BoardId,
        payload: Arc<str>,
    },
    Stats(oneshot::Sender<HubStats>),
    RoomSize {
        board: BoardId,
        reply: oneshot::Sender<usize>,
    },
    Shutdown,
}

/// Sending side of the hub. Cheap to clone.
#[derive(Clone)]
pub struct HubHandle {
    commands: mpsc::Sender<Command>,
    queue_capacity: usize,
}

impl HubHandle {
    /// Outbound queue size new subscribers should be created with.
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Create a subscriber sized for this hub without registering it.
    pub fn subscriber(
        &self,
        board: BoardId,
        user: UserId,
    ) -> (Subscriber, mpsc::Receiver<Arc<str>>) {
        Subscriber::channel(board, user, self.queue_capacity)
    }

    pub async fn register(&self, subscriber: Subscriber) -> Result<(), HubError> {
        self.send(Command::Register(subscriber)).await
    }

    /// Remove a connection. Unknown ids are ignored.
    pub async fn unregister(&self, board: BoardId, id: ConnectionId) -> Result<(), HubError> {
        self.send(Command::Unregister { board, id }).await
    }

    /// Serialize `event` once and queue it for every subscriber of `board`.
    ///
    /// An event that fails to serialize is logged and dropped.
    pub async fn broadcast<T: Serialize>(
        &self,
        board: BoardId,
        event: &ChangeEvent<T>,
    ) -> Result<(), HubError> {
        match event.encode() {
            Ok(payload) => {
                log::debug!("Broadcast {} queued for board {board}", event.event);
                self.broadcast_raw(board, payload).await
            }
            Err(e) => {
                log::error!("Failed to encode {} for board {board}: {e}", event.event);
                Ok(())
            }
        }
    }

    /// Queue an already encoded frame.
    pub async fn broadcast_raw(&self, board: BoardId, payload: Arc<str>) -> Result<(), HubError> {
        self.send(Command::Broadcast { board, payload }).await
    }

    pub async fn stats(&self) -> Result<HubStats, HubError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Stats(reply)).await?;
        rx.await.map_err(|_| HubError::Closed)
    }

    /// Number of connections currently in `board`'s room (0 when absent).
    pub async fn room_size(&self, board: BoardId) -> Result<usize, HubError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::RoomSize { board, reply }).await?;
        rx.await.map_err(|_| HubError::Closed)
    }

    /// Stop the hub loop. Every outbound queue is closed.
    pub async fn shutdown(&self) -> Result<(), HubError> {
        self.send(Command::Shutdown).await
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    async fn send(&self, command: Command) -> Result<(), HubError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| HubError::Closed)
    }
}

type Room = HashMap<ConnectionId, Subscriber>;

/// The hub loop. Owns every room.
pub struct Hub {
    config: HubConfig,
    commands: mpsc::Receiver<Command>,
    rooms: HashMap<BoardId, Room>,
    messages_sent: u64,
    evictions: u64,
}

impl Hub {
    pub fn new(config: HubConfig) -> (Self, HubHandle) {
        let (tx, rx) = mpsc::channel(config.command_capacity.max(1));
        let handle = HubHandle {
            commands: tx,
            queue_capacity: config.queue_capacity.max(1),
        };
        let hub = Self {
            config,
            commands: rx,
            rooms: HashMap::new(),
            messages_sent: 0,
            evictions: 0,
        };
        (hub, handle)
    }

    /// Start the loop on the current runtime.
    pub fn spawn(config: HubConfig) -> (HubHandle, tokio::task::JoinHandle<HubStats>) {
        let (hub, handle) = Self::new(config);
        (handle, tokio::spawn(hub.run()))
    }

    /// Drain commands until `shutdown` or until every handle is dropped.
    /// Returns the final counters.
    pub async fn run(mut self) -> HubStats {
        log::info!("Board hub started");

        while let Some(command) = self.commands.recv().await {
            match command {
                Command::Register(subscriber) => self.register(subscriber),
                Command::Unregister { board, id } => self.unregister(board, id),
                Command::Broadcast { board, payload } => self.fan_out(board, payload),
                Command::Stats(reply) => {
                    let _ = reply.send(self.snapshot());
                }
                Command::RoomSize { board, reply } => {
                    let _ = reply.send(self.rooms.get(&board).map_or(0, HashMap::len));
                }
                Command::Shutdown => break,
            }
        }

        let stats = self.snapshot();
        self.rooms.clear();
        log::info!(
            "Board hub stopped: {} message(s) sent, {} eviction(s)",
            stats.messages_sent,
            stats.evictions
        );
        stats
    }

    fn register(&mut self, subscriber: Subscriber) {
        let board = subscriber.board;
        let user = subscriber.user;
        let room = self.rooms.entry(board).or_default();
        room.insert(subscriber.id, subscriber);
        log::debug!(
            "Connection registered: board {board}, user {user}, {} in room",
            room.len()
        );
    }

    fn unregister(&mut self, board: BoardId, id: ConnectionId) {
        let Some(room) = self.rooms.get_mut(&board) else {
            return;
        };
        let Some(subscriber) = room.remove(&id) else {
            return;
        };
        let remaining = room.len();
        let still_present = room.values().any(|s| s.user == subscriber.user);
        drop(subscriber.outbound);

        log::debug!(
            "Connection unregistered: board {board}, user {}, {remaining} in room",
            subscriber.user
        );

        if remaining == 0 {
            self.rooms.remove(&board);
            log::debug!("Room {board} removed (empty)");
            return;
        }

        if self.config.announce_departures && !still_present {
            let event = ChangeEvent::new(
                EventKind::MemberLeft,
                MemberPresence {
                    board_id: board,
                    user_id: subscriber.user,
                },
            );
            match event.encode() {
                Ok(payload) => self.fan_out(board, payload),
                Err(e) => log::error!("Failed to encode member_left for board {board}: {e}"),
            }
        }
    }

    fn fan_out(&mut self, board: BoardId, payload: Arc<str>) {
        let Some(room) = self.rooms.get_mut(&board) else {
            log::trace!("Broadcast to board {board} skipped: no room");
            return;
        };

        let total = room.len();
        let mut delivered = 0usize;
        let mut gone = Vec::new();
        for (id, subscriber) in room.iter() {
            match subscriber.outbound.try_send(payload.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    log::warn!(
                        "Evicting slow connection: board {board}, user {} (queue full)",
                        subscriber.user
                    );
                    self.evictions += 1;
                    gone.push(*id);
                }
                Err(TrySendError::Closed(_)) => {
                    log::debug!(
                        "Dropping closed connection: board {board}, user {}",
                        subscriber.user
                    );
                    gone.push(*id);
                }
            }
        }

        for id in gone {
            room.remove(&id);
        }
        if room.is_empty() {
            self.rooms.remove(&board);
            log::debug!("Room {board} removed (empty)");
        }

        self.messages_sent += delivered as u64;
        log::debug!("Broadcast to board {board}: {delivered}/{total} delivered");
    }

    fn snapshot(&self) -> HubStats {
        HubStats {
            rooms: self.rooms.len(),
            connections: self.rooms.values().map(HashMap::len).sum(),
            messages_sent: self.messages_sent,
            evictions: self.evictions,
        }
    }
}
