//! Board entities and the sibling scopes their positions live in.

use serde::{Deserialize, Serialize};
use std::fmt;

pub type BoardId = i32;
pub type ListId = i32;
pub type CardId = i32;
pub type UserId = i32;

/// Identifier of any positioned item (list or card).
pub type ItemId = i32;

/// 1-based slot inside a scope.
pub type Position = i32;

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct List {
    pub id: ListId,
    pub board_id: BoardId,
    pub title: String,
    pub position: Position,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct Card {
    pub id: CardId,
    pub list_id: ListId,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub position: Position,
}

/// What kind of item a scope holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    List,
    Card,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::List => "list",
            Self::Card => "card",
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A sibling collection whose positions must stay contiguous.
///
/// Lists are ordered within their board, cards within their list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "id")]
pub enum Scope {
    Board(BoardId),
    List(ListId),
}

impl Scope {
    /// Kind of the items ordered inside this scope.
    pub fn item_kind(&self) -> ItemKind {
        match self {
            Self::Board(_) => ItemKind::List,
            Self::List(_) => ItemKind::Card,
        }
    }

    pub fn id(&self) -> i32 {
        match self {
            Self::Board(id) | Self::List(id) => *id,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Board(id) => write!(f, "board:{id}"),
            Self::List(id) => write!(f, "list:{id}"),
        }
    }
}

/// A list or a card, as returned by the store.
///
/// Serialized untagged so event payloads carry the bare entity.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(untagged)]
pub enum Entity {
    Card(Card),
    List(List),
}

impl Entity {
    pub fn id(&self) -> ItemId {
        match self {
            Self::List(l) => l.id,
            Self::Card(c) => c.id,
        }
    }

    pub fn position(&self) -> Position {
        match self {
            Self::List(l) => l.position,
            Self::Card(c) => c.position,
        }
    }

    pub fn kind(&self) -> ItemKind {
        match self {
            Self::List(_) => ItemKind::List,
            Self::Card(_) => ItemKind::Card,
        }
    }

    /// The scope this entity is ordered in.
    pub fn scope(&self) -> Scope {
        match self {
            Self::List(l) => Scope::Board(l.board_id),
            Self::Card(c) => Scope::List(c.list_id),
        }
    }

    pub fn ordered(&self) -> OrderedItem {
        OrderedItem {
            id: self.id(),
            position: self.position(),
        }
    }

    pub fn into_list(self) -> Option<List> {
        match self {
            Self::List(l) => Some(l),
            Self::Card(_) => None,
        }
    }

    pub fn into_card(self) -> Option<Card> {
        match self {
            Self::Card(c) => Some(c),
            Self::List(_) => None,
        }
    }
}

/// Fields for an item about to be created. `description` is ignored for lists.
#[derive(Clone, Serialize, Deserialize, Debug, Default, PartialEq, Eq)]
pub struct NewItem {
    pub title: String,
    pub description: Option<String>,
}

impl NewItem {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// The `(id, position)` projection the ordering arithmetic works on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderedItem {
    pub id: ItemId,
    pub position: Position,
}

impl OrderedItem {
    pub fn new(id: ItemId, position: Position) -> Self {
        Self { id, position }
    }
}
