//! Who may subscribe to a board.
//!
//! The server calls [`Admission::admit`] once per upgrade with the board id
//! and the raw bearer credential. Credential verification and membership
//! lookups live behind this trait; a denial means no hub state is created.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

use kanban_core::{BoardId, UserId};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("credential rejected")]
    Unauthenticated,

    #[error("user {user} is not a member of board {board}")]
    NotMember { board: BoardId, user: UserId },

    #[error("admission backend unavailable: {0}")]
    Unavailable(String),
}

impl AdmissionError {
    /// WebSocket close code sent when a session is refused after upgrade.
    pub fn close_code(&self) -> u16 {
        match self {
            Self::Unauthenticated | Self::NotMember { .. } => 1008,
            Self::Unavailable(_) => 1011,
        }
    }
}

#[async_trait]
pub trait Admission: Send + Sync {
    /// Resolve `credential` to a user allowed to watch `board`.
    async fn admit(&self, board: BoardId, credential: &str) -> Result<UserId, AdmissionError>;
}

/// Fixed token table and board membership. Useful for local runs and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticAdmission {
    tokens: HashMap<String, UserId>,
    members: HashMap<BoardId, HashSet<UserId>>,
}

impl StaticAdmission {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: impl Into<String>, user: UserId) -> Self {
        self.tokens.insert(token.into(), user);
        self
    }

    pub fn with_member(mut self, board: BoardId, user: UserId) -> Self {
        self.members.entry(board).or_default().insert(user);
        self
    }
}

#[async_trait]
impl Admission for StaticAdmission {
    async fn admit(&self, board: BoardId, credential: &str) -> Result<UserId, AdmissionError> {
        let user = *self
            .tokens
            .get(credential)
            .ok_or(AdmissionError::Unauthenticated)?;
        let is_member = self
            .members
            .get(&board)
            .is_some_and(|members| members.contains(&user));
        if is_member {
            Ok(user)
        } else {
            Err(AdmissionError::NotMember { board, user })
        }
    }
}
