//! In-memory [`PositionStore`] used by tests, benches and single-process
//! embeddings.
//!
//! Every trait call takes the table lock once, so each call is atomic the
//! same way a single SQL statement would be.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::model::{
    BoardId, Card, Entity, ItemId, ItemKind, List, ListId, NewItem, OrderedItem, Position, Scope,
};
use crate::ordering::ShiftDirection;
use crate::store::{PositionStore, StoreError};

#[derive(Debug, Default)]
struct Tables {
    boards: BTreeSet<BoardId>,
    lists: BTreeMap<ListId, List>,
    cards: BTreeMap<ItemId, Card>,
}

impl Tables {
    fn scope_exists(&self, scope: Scope) -> bool {
        match scope {
            Scope::Board(id) => self.boards.contains(&id),
            Scope::List(id) => self.lists.contains_key(&id),
        }
    }

    fn entities(&self, scope: Scope) -> Vec<Entity> {
        let mut items: Vec<Entity> = match scope {
            Scope::Board(board) => self
                .lists
                .values()
                .filter(|l| l.board_id == board)
                .cloned()
                .map(Entity::List)
                .collect(),
            Scope::List(list) => self
                .cards
                .values()
                .filter(|c| c.list_id == list)
                .cloned()
                .map(Entity::Card)
                .collect(),
        };
        // Stable: equal positions stay in id order.
        items.sort_by_key(|e| e.position());
        items
    }

    fn next_id(&self, kind: ItemKind) -> ItemId {
        let max = match kind {
            ItemKind::List => self.lists.keys().next_back().copied(),
            ItemKind::Card => self.cards.keys().next_back().copied(),
        };
        max.unwrap_or(0) + 1
    }
}

/// Thread-safe in-memory board store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, StoreError> {
        self.tables
            .read()
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, StoreError> {
        self.tables
            .write()
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    pub fn add_board(&self, board: BoardId) -> Result<(), StoreError> {
        self.write()?.boards.insert(board);
        Ok(())
    }

    /// Insert a list verbatim, without shifting siblings. Creates the board
    /// if needed.
    pub fn seed_list(
        &self,
        board: BoardId,
        id: ListId,
        title: impl Into<String>,
        position: Position,
    ) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        tables.boards.insert(board);
        tables.lists.insert(
            id,
            List {
                id,
                board_id: board,
                title: title.into(),
                position,
            },
        );
        Ok(())
    }

    /// Insert a card verbatim, without shifting siblings.
    pub fn seed_card(
        &self,
        list: ListId,
        id: ItemId,
        title: impl Into<String>,
        position: Position,
    ) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        if !tables.lists.contains_key(&list) {
            return Err(StoreError::ScopeNotFound(Scope::List(list)));
        }
        tables.cards.insert(
            id,
            Card {
                id,
                list_id: list,
                title: title.into(),
                description: None,
                position,
            },
        );
        Ok(())
    }

    /// `(id, position)` pairs of a scope, ordered by position.
    pub fn positions(&self, scope: Scope) -> Result<Vec<OrderedItem>, StoreError> {
        Ok(self
            .read()?
            .entities(scope)
            .iter()
            .map(Entity::ordered)
            .collect())
    }

    pub fn len(&self, scope: Scope) -> Result<usize, StoreError> {
        Ok(self.read()?.entities(scope).len())
    }
}

#[async_trait]
impl PositionStore for MemoryStore {
    async fn list_boards(&self) -> Result<Vec<BoardId>, StoreError> {
        Ok(self.read()?.boards.iter().copied().collect())
    }

    async fn list_by_scope(&self, scope: Scope) -> Result<Vec<Entity>, StoreError> {
        let tables = self.read()?;
        if !tables.scope_exists(scope) {
            return Err(StoreError::ScopeNotFound(scope));
        }
        Ok(tables.entities(scope))
    }

    async fn get(&self, kind: ItemKind, id: ItemId) -> Result<Entity, StoreError> {
        let tables = self.read()?;
        let found = match kind {
            ItemKind::List => tables.lists.get(&id).cloned().map(Entity::List),
            ItemKind::Card => tables.cards.get(&id).cloned().map(Entity::Card),
        };
        found.ok_or(StoreError::NotFound { kind, id })
    }

    async fn shift_after(
        &self,
        scope: Scope,
        from: Position,
        direction: ShiftDirection,
    ) -> Result<u64, StoreError> {
        let mut tables = self.write()?;
        let mut affected = 0;
        match scope {
            Scope::Board(board) => {
                for list in tables.lists.values_mut().filter(|l| l.board_id == board) {
                    if direction.affects(list.position, from) {
                        list.position += direction.delta();
                        affected += 1;
                    }
                }
            }
            Scope::List(list_id) => {
                for card in tables.cards.values_mut().filter(|c| c.list_id == list_id) {
                    if direction.affects(card.position, from) {
                        card.position += direction.delta();
                        affected += 1;
                    }
                }
            }
        }
        Ok(affected)
    }

    async fn create_at(
        &self,
        scope: Scope,
        position: Position,
        item: NewItem,
    ) -> Result<Entity, StoreError> {
        let mut tables = self.write()?;
        if !tables.scope_exists(scope) {
            return Err(StoreError::ScopeNotFound(scope));
        }
        let id = tables.next_id(scope.item_kind());
        let entity = match scope {
            Scope::Board(board_id) => {
                let list = List {
                    id,
                    board_id,
                    title: item.title,
                    position,
                };
                tables.lists.insert(id, list.clone());
                Entity::List(list)
            }
            Scope::List(list_id) => {
                let card = Card {
                    id,
                    list_id,
                    title: item.title,
                    description: item.description,
                    position,
                };
                tables.cards.insert(id, card.clone());
                Entity::Card(card)
            }
        };
        Ok(entity)
    }

    async fn update_position(
        &self,
        scope: Scope,
        id: ItemId,
        position: Position,
    ) -> Result<Entity, StoreError> {
        let mut tables = self.write()?;
        if !tables.scope_exists(scope) {
            return Err(StoreError::ScopeNotFound(scope));
        }
        match scope {
            Scope::Board(board) => {
                let list = tables.lists.get_mut(&id).ok_or(StoreError::NotFound {
                    kind: ItemKind::List,
                    id,
                })?;
                if list.board_id != board {
                    return Err(StoreError::ScopeMismatch {
                        kind: ItemKind::List,
                        id,
                        scope,
                    });
                }
                list.position = position;
                Ok(Entity::List(list.clone()))
            }
            Scope::List(list_id) => {
                let card = tables.cards.get_mut(&id).ok_or(StoreError::NotFound {
                    kind: ItemKind::Card,
                    id,
                })?;
                card.list_id = list_id;
                card.position = position;
                Ok(Entity::Card(card.clone()))
            }
        }
    }

    async fn remove(&self, kind: ItemKind, id: ItemId) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        match kind {
            ItemKind::List => {
                tables
                    .lists
                    .remove(&id)
                    .ok_or(StoreError::NotFound { kind, id })?;
                tables.cards.retain(|_, c| c.list_id != id);
            }
            ItemKind::Card => {
                tables
                    .cards
                    .remove(&id)
                    .ok_or(StoreError::NotFound { kind, id })?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn board_with_lists() -> MemoryStore {
        let store = MemoryStore::new();
        store.seed_list(1, 1, "Todo", 1).unwrap();
        store.seed_list(1, 2, "Doing", 2).unwrap();
        store.seed_list(1, 3, "Done", 3).unwrap();
        store
    }

    #[tokio::test]
    async fn test_list_by_scope_orders_by_position() {
        let store = MemoryStore::new();
        store.seed_list(1, 10, "c", 3).unwrap();
        store.seed_list(1, 11, "a", 1).unwrap();
        store.seed_list(1, 12, "b", 2).unwrap();

        let ids: Vec<ItemId> = store
            .list_by_scope(Scope::Board(1))
            .await
            .unwrap()
            .iter()
            .map(Entity::id)
            .collect();
        assert_eq!(ids, vec![11, 12, 10]);
    }

    #[tokio::test]
    async fn test_shift_up_and_down() {
        let store = board_with_lists();
        let scope = Scope::Board(1);

        let touched = store.shift_after(scope, 2, ShiftDirection::Up).await.unwrap();
        assert_eq!(touched, 2);
        assert_eq!(
            store.positions(scope).unwrap(),
            vec![
                OrderedItem::new(1, 1),
                OrderedItem::new(2, 3),
                OrderedItem::new(3, 4)
            ]
        );

        let touched = store.shift_after(scope, 3, ShiftDirection::Down).await.unwrap();
        assert_eq!(touched, 1);
        assert_eq!(store.positions(scope).unwrap()[2], OrderedItem::new(3, 3));
    }

    #[tokio::test]
    async fn test_create_assigns_fresh_ids() {
        let store = board_with_lists();
        let list = store
            .create_at(Scope::Board(1), 4, NewItem::titled("Later"))
            .await
            .unwrap();
        assert_eq!(list.id(), 4);

        let card = store
            .create_at(
                Scope::List(4),
                1,
                NewItem::titled("Ship").with_description("v1"),
            )
            .await
            .unwrap()
            .into_card()
            .unwrap();
        assert_eq!(card.id, 1);
        assert_eq!(card.description.as_deref(), Some("v1"));
    }

    #[tokio::test]
    async fn test_create_in_unknown_scope_fails() {
        let store = MemoryStore::new();
        let err = store
            .create_at(Scope::List(9), 1, NewItem::titled("x"))
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::ScopeNotFound(Scope::List(9)));
    }

    #[tokio::test]
    async fn test_update_position_reparents_card() {
        let store = board_with_lists();
        store.seed_card(1, 1, "a", 1).unwrap();

        let moved = store.update_position(Scope::List(2), 1, 1).await.unwrap();
        assert_eq!(moved.scope(), Scope::List(2));
        assert_eq!(store.len(Scope::List(1)).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_list_cannot_change_board() {
        let store = board_with_lists();
        store.add_board(2).unwrap();
        let err = store.update_position(Scope::Board(2), 1, 1).await.unwrap_err();
        assert!(matches!(err, StoreError::ScopeMismatch { .. }));
    }

    #[tokio::test]
    async fn test_remove_list_cascades_cards() {
        let store = board_with_lists();
        store.seed_card(2, 1, "a", 1).unwrap();
        store.seed_card(2, 2, "b", 2).unwrap();

        store.remove(ItemKind::List, 2).await.unwrap();
        assert!(store.get(ItemKind::Card, 1).await.is_err());
        assert_eq!(
            store.remove(ItemKind::List, 2).await.unwrap_err(),
            StoreError::NotFound {
                kind: ItemKind::List,
                id: 2
            }
        );
    }

    #[tokio::test]
    async fn test_list_boards() {
        let store = board_with_lists();
        store.add_board(5).unwrap();
        assert_eq!(store.list_boards().await.unwrap(), vec![1, 5]);
    }
}
