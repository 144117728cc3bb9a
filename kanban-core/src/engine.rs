//! Runs ordering plans against a [`PositionStore`].
//!
//! Each mutation is a fixed sequence of individually atomic storage calls:
//!
//! | Mutation | Steps                                                   |
//! |----------|---------------------------------------------------------|
//! | insert   | scan, shift up from P, create at P                      |
//! | delete   | scan, remove, shift down from P                         |
//! | move     | scan both scopes, shift down in source, shift up in     |
//! |          | destination, place item                                 |
//! | repair   | list scope, rewrite every out-of-place position         |
//!
//! The scan repairs the scope first when it is not contiguous, because the
//! shift arithmetic assumes `1..=N` going in. Those repairs are returned with
//! the mutation in [`Applied::repairs`] so callers can announce them. A failed
//! step abandons the mutation; whatever it left behind is re-derived from
//! relative order by the next repair.

use std::sync::Arc;
use thiserror::Error;

use crate::model::{BoardId, Entity, ItemId, ItemKind, NewItem, OrderedItem, Position, Scope};
use crate::ordering::{self, PositionUpdate};
use crate::store::{PositionStore, StoreError};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OrderingError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{kind} {id} cannot move from {from} to {to}: scopes belong to different boards")]
    CrossBoardMove {
        kind: ItemKind,
        id: ItemId,
        from: Scope,
        to: Scope,
    },

    #[error("{kind} {id} cannot be placed in {scope}")]
    WrongScopeKind {
        kind: ItemKind,
        id: ItemId,
        scope: Scope,
    },

    #[error("{scope} still has {failed} out-of-place item(s) after repair")]
    RepairIncomplete { scope: Scope, failed: usize },
}

/// Outcome of one repair pass over a scope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairReport {
    pub scope: Option<Scope>,
    pub examined: usize,
    /// Updates that were written.
    pub updated: Vec<PositionUpdate>,
    /// Updates that failed, with the storage error.
    pub failed: Vec<(PositionUpdate, StoreError)>,
}

impl RepairReport {
    fn new(scope: Scope) -> Self {
        Self {
            scope: Some(scope),
            ..Self::default()
        }
    }

    pub fn changed(&self) -> bool {
        !self.updated.is_empty()
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Repair results for a whole board: its lists, then the cards of each list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoardRepair {
    pub board: BoardId,
    pub lists: RepairReport,
    pub cards: Vec<RepairReport>,
    /// Lists whose cards could not be listed at all.
    pub skipped: Vec<(Scope, StoreError)>,
}

impl BoardRepair {
    pub fn items_updated(&self) -> usize {
        self.lists.updated.len() + self.cards.iter().map(|r| r.updated.len()).sum::<usize>()
    }

    pub fn items_failed(&self) -> usize {
        self.lists.failed.len()
            + self.cards.iter().map(|r| r.failed.len()).sum::<usize>()
            + self.skipped.len()
    }

    /// Every report with at least one written update.
    pub fn changed_scopes(&self) -> impl Iterator<Item = &RepairReport> {
        std::iter::once(&self.lists)
            .chain(self.cards.iter())
            .filter(|r| r.changed())
    }
}

/// A stored mutation and the repairs that ran ahead of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied<T> {
    pub value: T,
    /// Non-contiguous scopes renumbered before the mutation, in order.
    pub repairs: Vec<RepairReport>,
}

impl<T> Applied<T> {
    fn new(value: T, repairs: Vec<RepairReport>) -> Self {
        Self { value, repairs }
    }

    pub fn repaired(&self) -> usize {
        self.repairs.iter().map(|r| r.updated.len()).sum()
    }
}

/// Result of a move request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveOutcome {
    pub entity: Entity,
    pub from_scope: Scope,
    pub from_position: Position,
    /// False when the request resolved to the item's current slot.
    pub moved: bool,
}

/// Storage-driven ordering engine. Cheap to clone.
#[derive(Clone)]
pub struct OrderingEngine {
    store: Arc<dyn PositionStore>,
}

impl OrderingEngine {
    pub fn new(store: Arc<dyn PositionStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn PositionStore> {
        &self.store
    }

    /// Load a scope, repairing it first if its positions are not contiguous.
    ///
    /// Returns the `(id, position)` projection and the repair, if one ran. A
    /// repair that leaves any item unwritten is an error: the scope is still
    /// not `1..=N` and no shift may be applied to it.
    pub async fn ensure_contiguous(
        &self,
        scope: Scope,
    ) -> Result<(Vec<OrderedItem>, Option<RepairReport>), OrderingError> {
        let items = self.scan(scope).await?;
        let conflicts = ordering::find_conflicts(&items);
        if conflicts.is_empty() {
            return Ok((items, None));
        }

        log::warn!(
            "Position conflicts in {scope}: {} finding(s), first {:?}; repairing",
            conflicts.len(),
            conflicts[0]
        );
        let report = self.normalize(scope).await?;
        if !report.is_clean() {
            return Err(OrderingError::RepairIncomplete {
                scope,
                failed: report.failed.len(),
            });
        }
        Ok((self.scan(scope).await?, Some(report)))
    }

    async fn scan(&self, scope: Scope) -> Result<Vec<OrderedItem>, StoreError> {
        Ok(self
            .store
            .list_by_scope(scope)
            .await?
            .iter()
            .map(Entity::ordered)
            .collect())
    }

    /// Insert a new item into `scope` at `requested` (clamped to `[1, N+1]`).
    pub async fn insert(
        &self,
        scope: Scope,
        requested: Position,
        item: NewItem,
    ) -> Result<Applied<Entity>, OrderingError> {
        let (items, repair) = self.ensure_contiguous(scope).await?;
        let plan = ordering::plan_insert(scope, requested, items.len());
        if plan.position != requested {
            log::debug!(
                "Insert into {scope}: requested position {requested} clamped to {}",
                plan.position
            );
        }

        let shifted = self
            .store
            .shift_after(scope, plan.shift.from, plan.shift.direction)
            .await?;
        let entity = self.store.create_at(scope, plan.position, item).await?;

        log::debug!(
            "Inserted {} {} into {scope} at {} ({shifted} shifted)",
            entity.kind(),
            entity.id(),
            plan.position
        );
        Ok(Applied::new(entity, repair.into_iter().collect()))
    }

    /// Delete an item and close the gap it leaves. Returns the removed item.
    pub async fn delete(
        &self,
        kind: ItemKind,
        id: ItemId,
    ) -> Result<Applied<Entity>, OrderingError> {
        let entity = self.store.get(kind, id).await?;
        let scope = entity.scope();
        let (items, repair) = self.ensure_contiguous(scope).await?;
        let position = position_of(&items, id).unwrap_or(entity.position());

        self.store.remove(kind, id).await?;
        let shift = ordering::plan_delete(scope, position);
        let shifted = self
            .store
            .shift_after(scope, shift.from, shift.direction)
            .await?;

        log::debug!("Deleted {kind} {id} from {scope} at {position} ({shifted} shifted)");
        Ok(Applied::new(entity, repair.into_iter().collect()))
    }

    /// Move an item to `requested` inside `to`.
    ///
    /// The destination is clamped to `[1, M+1]` where `M` counts `to` without
    /// the moving item. Cross-scope moves must stay on one board.
    pub async fn move_item(
        &self,
        kind: ItemKind,
        id: ItemId,
        to: Scope,
        requested: Position,
    ) -> Result<Applied<MoveOutcome>, OrderingError> {
        if to.item_kind() != kind {
            return Err(OrderingError::WrongScopeKind { kind, id, scope: to });
        }

        let entity = self.store.get(kind, id).await?;
        let from = entity.scope();
        if from != to && self.board_of(from).await? != self.board_of(to).await? {
            return Err(OrderingError::CrossBoardMove { kind, id, from, to });
        }

        let mut repairs = Vec::new();
        let (source, repair) = self.ensure_contiguous(from).await?;
        repairs.extend(repair);
        let dest_len = if from == to {
            source.len().saturating_sub(1)
        } else {
            let (dest, repair) = self.ensure_contiguous(to).await?;
            repairs.extend(repair);
            dest.len()
        };

        let from_position = position_of(&source, id).unwrap_or(entity.position());
        let Some(plan) = ordering::plan_move(from, from_position, to, requested, dest_len) else {
            log::debug!("Move of {kind} {id} resolves to its current slot {from_position} in {from}");
            let entity = if entity.position() == from_position {
                entity
            } else {
                self.store.get(kind, id).await?
            };
            let outcome = MoveOutcome {
                entity,
                from_scope: from,
                from_position,
                moved: false,
            };
            return Ok(Applied::new(outcome, repairs));
        };

        self.store
            .shift_after(plan.close.scope, plan.close.from, plan.close.direction)
            .await?;
        self.store
            .shift_after(plan.open.scope, plan.open.from, plan.open.direction)
            .await?;
        let placed = self.store.update_position(plan.to, id, plan.target).await?;

        log::debug!(
            "Moved {kind} {id} from {from}@{from_position} to {to}@{}",
            plan.target
        );
        let outcome = MoveOutcome {
            entity: placed,
            from_scope: from,
            from_position,
            moved: true,
        };
        Ok(Applied::new(outcome, repairs))
    }

    /// Board owning a list.
    pub async fn board_of_list(&self, list: ItemId) -> Result<BoardId, StoreError> {
        match self.store.get(ItemKind::List, list).await? {
            Entity::List(l) => Ok(l.board_id),
            Entity::Card(_) => Err(StoreError::Backend(format!(
                "store returned a card for list {list}"
            ))),
        }
    }

    /// Board owning a scope.
    pub async fn board_of(&self, scope: Scope) -> Result<BoardId, StoreError> {
        match scope {
            Scope::Board(board) => Ok(board),
            Scope::List(list) => self.board_of_list(list).await,
        }
    }

    /// Renumber `scope` to `1..=N` by current relative order.
    ///
    /// Per-item write failures are logged and recorded; the pass continues
    /// with the remaining siblings. Only a failure to list the scope is
    /// returned as an error. Running it twice is the same as running it once.
    pub async fn normalize(&self, scope: Scope) -> Result<RepairReport, OrderingError> {
        let items = self.scan(scope).await?;
        let mut report = RepairReport::new(scope);
        report.examined = items.len();

        for update in ordering::normalize_plan(&items) {
            match self.store.update_position(scope, update.id, update.to).await {
                Ok(_) => report.updated.push(update),
                Err(e) => {
                    log::error!(
                        "Failed to renumber {} {} in {scope} from {} to {}: {e}",
                        scope.item_kind(),
                        update.id,
                        update.from,
                        update.to
                    );
                    report.failed.push((update, e));
                }
            }
        }

        if report.changed() {
            log::info!(
                "Normalized {scope}: {} of {} item(s) renumbered",
                report.updated.len(),
                report.examined
            );
        }
        Ok(report)
    }

    /// Repair a board's lists, then the cards of every list on it.
    pub async fn normalize_board(&self, board: BoardId) -> Result<BoardRepair, OrderingError> {
        let lists = self.normalize(Scope::Board(board)).await?;
        let mut repair = BoardRepair {
            board,
            lists,
            ..BoardRepair::default()
        };

        let list_ids: Vec<ItemId> = self
            .store
            .list_by_scope(Scope::Board(board))
            .await?
            .iter()
            .map(Entity::id)
            .collect();

        for list in list_ids {
            let scope = Scope::List(list);
            match self.normalize(scope).await {
                Ok(report) => repair.cards.push(report),
                Err(OrderingError::Store(e)) => {
                    log::error!("Skipping card repair for {scope} on board {board}: {e}");
                    repair.skipped.push((scope, e));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(repair)
    }
}

fn position_of(items: &[OrderedItem], id: ItemId) -> Option<Position> {
    items.iter().find(|i| i.id == id).map(|i| i.position)
}
