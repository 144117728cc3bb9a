//! Storage boundary consumed by the ordering engine.
//!
//! Each call is assumed to be individually atomic. The engine never wraps a
//! multi-step shift in a transaction of its own; interrupted sequences are
//! repaired later by a normalize pass.

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{BoardId, Entity, ItemId, ItemKind, NewItem, Position, Scope};
use crate::ordering::ShiftDirection;

/// Storage errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("{kind} {id} not found")]
    NotFound { kind: ItemKind, id: ItemId },

    #[error("scope {0} not found")]
    ScopeNotFound(Scope),

    #[error("{kind} {id} cannot be placed in {scope}")]
    ScopeMismatch {
        kind: ItemKind,
        id: ItemId,
        scope: Scope,
    },

    #[error("storage backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait PositionStore: Send + Sync {
    /// Every board id known to the store.
    async fn list_boards(&self) -> Result<Vec<BoardId>, StoreError>;

    /// Items of `scope`, ordered by position (ties in storage order).
    async fn list_by_scope(&self, scope: Scope) -> Result<Vec<Entity>, StoreError>;

    async fn get(&self, kind: ItemKind, id: ItemId) -> Result<Entity, StoreError>;

    /// Shift every item of `scope` selected by `direction` relative to `from`.
    ///
    /// Returns the number of rows touched.
    async fn shift_after(
        &self,
        scope: Scope,
        from: Position,
        direction: ShiftDirection,
    ) -> Result<u64, StoreError>;

    /// Create a new item of `scope.item_kind()` at `position`.
    async fn create_at(
        &self,
        scope: Scope,
        position: Position,
        item: NewItem,
    ) -> Result<Entity, StoreError>;

    /// Set an item's position, re-parenting it into `scope` when it differs
    /// from the item's current scope.
    async fn update_position(
        &self,
        scope: Scope,
        id: ItemId,
        position: Position,
    ) -> Result<Entity, StoreError>;

    /// Delete an item. Removing a list removes its cards.
    async fn remove(&self, kind: ItemKind, id: ItemId) -> Result<(), StoreError>;
}
