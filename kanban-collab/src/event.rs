//! Change events pushed to board subscribers.
//!
//! Wire format (JSON text frame):
//! ```text
//! {"event": "card_moved", "data": { ...entity or payload... }}
//! ```
//!
//! An event is encoded once per broadcast and the resulting `Arc<str>` is
//! shared by every recipient's outbound queue.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use kanban_core::{
    BoardId, Entity, ItemId, ItemKind, ListId, Position, PositionUpdate, Scope, UserId,
};

/// Every event kind clients understand.
///
/// Board lifecycle and `*_updated` (title, description) events carry no
/// ordering and are published by the owning services through
/// [`HubHandle::broadcast`](crate::hub::HubHandle::broadcast); this crate
/// produces the rest itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    BoardCreated,
    BoardUpdated,
    BoardDeleted,
    ListCreated,
    ListUpdated,
    ListMoved,
    ListDeleted,
    CardCreated,
    CardUpdated,
    CardMoved,
    CardDeleted,
    MemberAdded,
    MemberRemoved,
    MemberLeft,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BoardCreated => "board_created",
            Self::BoardUpdated => "board_updated",
            Self::BoardDeleted => "board_deleted",
            Self::ListCreated => "list_created",
            Self::ListUpdated => "list_updated",
            Self::ListMoved => "list_moved",
            Self::ListDeleted => "list_deleted",
            Self::CardCreated => "card_created",
            Self::CardUpdated => "card_updated",
            Self::CardMoved => "card_moved",
            Self::CardDeleted => "card_deleted",
            Self::MemberAdded => "member_added",
            Self::MemberRemoved => "member_removed",
            Self::MemberLeft => "member_left",
        }
    }

    pub fn created(kind: ItemKind) -> Self {
        match kind {
            ItemKind::List => Self::ListCreated,
            ItemKind::Card => Self::CardCreated,
        }
    }

    pub fn moved(kind: ItemKind) -> Self {
        match kind {
            ItemKind::List => Self::ListMoved,
            ItemKind::Card => Self::CardMoved,
        }
    }

    pub fn deleted(kind: ItemKind) -> Self {
        match kind {
            ItemKind::List => Self::ListDeleted,
            ItemKind::Card => Self::CardDeleted,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `{event, data}` envelope. `T` is any serializable payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChangeEvent<T = serde_json::Value> {
    pub event: EventKind,
    pub data: T,
}

impl<T: Serialize> ChangeEvent<T> {
    pub fn new(event: EventKind, data: T) -> Self {
        Self { event, data }
    }

    /// Serialize to the shared wire representation.
    pub fn encode(&self) -> Result<Arc<str>, serde_json::Error> {
        serde_json::to_string(self).map(Arc::from)
    }
}

impl ChangeEvent<serde_json::Value> {
    /// Parse a frame received from the hub.
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

impl ChangeEvent<Entity> {
    pub fn created(entity: Entity) -> Self {
        Self::new(EventKind::created(entity.kind()), entity)
    }

    pub fn moved(entity: Entity) -> Self {
        Self::new(EventKind::moved(entity.kind()), entity)
    }
}

/// Payload of `*_deleted` events.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Deleted {
    pub id: ItemId,
    pub board_id: BoardId,
    /// Set for cards.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_id: Option<ListId>,
}

impl Deleted {
    pub fn in_scope(id: ItemId, board_id: BoardId, scope: Scope) -> Self {
        Self {
            id,
            board_id,
            list_id: list_of(scope),
        }
    }
}

/// Payload of `*_moved` events emitted by a repair pass.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PositionChanged {
    pub id: ItemId,
    pub board_id: BoardId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_id: Option<ListId>,
    pub position: Position,
    pub previous: Position,
}

impl PositionChanged {
    pub fn from_update(board_id: BoardId, scope: Scope, update: &PositionUpdate) -> Self {
        Self {
            id: update.id,
            board_id,
            list_id: list_of(scope),
            position: update.to,
            previous: update.from,
        }
    }
}

fn list_of(scope: Scope) -> Option<ListId> {
    match scope {
        Scope::Board(_) => None,
        Scope::List(list) => Some(list),
    }
}

/// Payload of membership events.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemberPresence {
    pub board_id: BoardId,
    pub user_id: UserId,
}

#[cfg(test)]
mod tests {
    use super::*;
    use kanban_core::Card;
    use serde_json::json;

    #[test]
    fn test_event_kind_wire_names_match_serde() {
        for kind in [
            EventKind::BoardCreated,
            EventKind::ListMoved,
            EventKind::CardDeleted,
            EventKind::MemberLeft,
        ] {
            let encoded = serde_json::to_value(kind).unwrap();
            assert_eq!(encoded, json!(kind.as_str()));
        }
    }

    #[test]
    fn test_envelope_shape() {
        let event = ChangeEvent::new(
            EventKind::CardDeleted,
            Deleted::in_scope(5, 1, Scope::List(2)),
        );
        let text = event.encode().unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            value,
            json!({"event": "card_deleted", "data": {"id": 5, "board_id": 1, "list_id": 2}})
        );
    }

    #[test]
    fn test_entity_event_picks_kind() {
        let card = Entity::Card(Card {
            id: 1,
            list_id: 3,
            title: "Review".into(),
            description: None,
            position: 2,
        });
        let event = ChangeEvent::moved(card);
        assert_eq!(event.event, EventKind::CardMoved);

        let decoded = ChangeEvent::decode(&event.encode().unwrap()).unwrap();
        assert_eq!(decoded.event, EventKind::CardMoved);
        assert_eq!(decoded.data["list_id"], json!(3));
    }

    #[test]
    fn test_position_changed_from_update() {
        let update = PositionUpdate { id: 4, from: 1, to: 2 };
        let payload = PositionChanged::from_update(9, Scope::Board(9), &update);
        assert_eq!(payload.board_id, 9);
        assert_eq!(payload.list_id, None);
        assert_eq!(payload.position, 2);
        assert_eq!(payload.previous, 1);
    }
}
