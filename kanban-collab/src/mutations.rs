//! Board mutations that reorder and then notify.
//!
//! Every successful mutation is followed by exactly one broadcast on the
//! owning board; a repair broadcasts one `*_moved` per renumbered item.
//! Repairs the engine ran ahead of a mutation are announced before the
//! mutation's own event. Broadcasting never fails a mutation: the change is
//! already stored.

use serde::Serialize;

use kanban_core::{
    Applied, BoardId, BoardRepair, CardId, Entity, ItemId, ItemKind, ListId, MoveOutcome,
    NewItem, OrderingEngine, OrderingError, Position, RepairReport, Scope, UserId,
};

use crate::event::{ChangeEvent, Deleted, EventKind, MemberPresence, PositionChanged};
use crate::hub::{HubError, HubHandle};

/// Ordering engine plus the hub it reports to. Cheap to clone.
#[derive(Clone)]
pub struct BoardMutations {
    engine: OrderingEngine,
    hub: HubHandle,
}

impl BoardMutations {
    pub fn new(engine: OrderingEngine, hub: HubHandle) -> Self {
        Self { engine, hub }
    }

    pub fn engine(&self) -> &OrderingEngine {
        &self.engine
    }

    pub fn hub(&self) -> &HubHandle {
        &self.hub
    }

    pub async fn create_list(
        &self,
        board: BoardId,
        position: Position,
        item: NewItem,
    ) -> Result<Entity, OrderingError> {
        self.create(Scope::Board(board), position, item).await
    }

    pub async fn create_card(
        &self,
        list: ListId,
        position: Position,
        item: NewItem,
    ) -> Result<Entity, OrderingError> {
        self.create(Scope::List(list), position, item).await
    }

    async fn create(
        &self,
        scope: Scope,
        position: Position,
        item: NewItem,
    ) -> Result<Entity, OrderingError> {
        let board = self.engine.board_of(scope).await?;
        let applied = self.engine.insert(scope, position, item).await?;
        let entity = self.announce_repairs(board, applied).await;
        self.publish(board, &ChangeEvent::created(entity.clone())).await;
        Ok(entity)
    }

    /// Reorder a list within its board.
    pub async fn move_list(
        &self,
        list: ListId,
        position: Position,
    ) -> Result<MoveOutcome, OrderingError> {
        let board = self.engine.board_of_list(list).await?;
        self.relocate(board, ItemKind::List, list, Scope::Board(board), position)
            .await
    }

    /// Move a card to `position` in `to_list`, which may be its current list.
    pub async fn move_card(
        &self,
        card: CardId,
        to_list: ListId,
        position: Position,
    ) -> Result<MoveOutcome, OrderingError> {
        let board = self.engine.board_of_list(to_list).await?;
        self.relocate(board, ItemKind::Card, card, Scope::List(to_list), position)
            .await
    }

    async fn relocate(
        &self,
        board: BoardId,
        kind: ItemKind,
        id: ItemId,
        to: Scope,
        position: Position,
    ) -> Result<MoveOutcome, OrderingError> {
        let applied = self.engine.move_item(kind, id, to, position).await?;
        let outcome = self.announce_repairs(board, applied).await;
        if outcome.moved {
            self.publish(board, &ChangeEvent::moved(outcome.entity.clone()))
                .await;
        }
        Ok(outcome)
    }

    /// Delete a list and, with it, its cards.
    pub async fn delete_list(&self, list: ListId) -> Result<Entity, OrderingError> {
        self.remove(ItemKind::List, list).await
    }

    pub async fn delete_card(&self, card: CardId) -> Result<Entity, OrderingError> {
        self.remove(ItemKind::Card, card).await
    }

    async fn remove(&self, kind: ItemKind, id: ItemId) -> Result<Entity, OrderingError> {
        let scope = self.engine.store().get(kind, id).await?.scope();
        let board = self.engine.board_of(scope).await?;
        let applied = self.engine.delete(kind, id).await?;
        let removed = self.announce_repairs(board, applied).await;
        let event = ChangeEvent::new(
            EventKind::deleted(kind),
            Deleted::in_scope(id, board, removed.scope()),
        );
        self.publish(board, &event).await;
        Ok(removed)
    }

    /// Repair every scope on `board` and announce each renumbered item.
    pub async fn normalize_board(&self, board: BoardId) -> Result<BoardRepair, OrderingError> {
        let repair = self.engine.normalize_board(board).await?;
        publish_repair(&self.hub, &repair).await;
        Ok(repair)
    }

    /// Tell a board's viewers that `user` joined it.
    pub async fn member_added(&self, board: BoardId, user: UserId) {
        let presence = MemberPresence {
            board_id: board,
            user_id: user,
        };
        self.publish(board, &ChangeEvent::new(EventKind::MemberAdded, presence))
            .await;
    }

    pub async fn member_removed(&self, board: BoardId, user: UserId) {
        let presence = MemberPresence {
            board_id: board,
            user_id: user,
        };
        self.publish(board, &ChangeEvent::new(EventKind::MemberRemoved, presence))
            .await;
    }

    async fn announce_repairs<T>(&self, board: BoardId, applied: Applied<T>) -> T {
        for report in &applied.repairs {
            if let Err(e) = publish_scope_repair(&self.hub, board, report).await {
                log::warn!("Repair of board {board} not broadcast: {e}");
                break;
            }
        }
        applied.value
    }

    async fn publish<T: Serialize>(&self, board: BoardId, event: &ChangeEvent<T>) {
        if let Err(e) = self.hub.broadcast(board, event).await {
            log::warn!("{} for board {board} not broadcast: {e}", event.event);
        }
    }
}

/// Broadcast one `*_moved` per item a repair renumbered. Returns how many
/// events were handed to the hub.
pub(crate) async fn publish_repair(hub: &HubHandle, repair: &BoardRepair) -> usize {
    let mut published = 0;
    for report in repair.changed_scopes() {
        match publish_scope_repair(hub, repair.board, report).await {
            Ok(n) => published += n,
            Err(e) => {
                log::warn!("Repair of board {} not broadcast: {e}", repair.board);
                break;
            }
        }
    }
    published
}

async fn publish_scope_repair(
    hub: &HubHandle,
    board: BoardId,
    report: &RepairReport,
) -> Result<usize, HubError> {
    let Some(scope) = report.scope else {
        return Ok(0);
    };
    let kind = EventKind::moved(scope.item_kind());
    for update in &report.updated {
        let payload = PositionChanged::from_update(board, scope, update);
        hub.broadcast(board, &ChangeEvent::new(kind, payload)).await?;
    }
    Ok(report.updated.len())
}
