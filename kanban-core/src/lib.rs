//! # kanban-core: Board domain and position ordering
//!
//! Transport-free half of the board collaboration layer.
//!
//! ## Modules
//!
//! - [`model`]: ids, `List` / `Card` entities, the `Scope` of a sibling collection
//! - [`ordering`]: pure shift / clamp / conflict / normalize arithmetic
//! - [`store`]: `PositionStore`, the storage boundary
//! - [`engine`]: `OrderingEngine`, runs plans against a store
//! - [`memory`]: `MemoryStore`, an in-memory `PositionStore`
//!
//! ```text
//! mutation ──► OrderingEngine ──► ordering::plan_* ──► PositionStore
//!                    ▲
//!                    └── normalize / normalize_board (repair pass)
//! ```

pub mod model;
pub mod ordering;
pub mod store;
pub mod engine;
pub mod memory;

pub use model::{
    BoardId, Card, CardId, Entity, ItemId, ItemKind, List, ListId, NewItem, OrderedItem,
    Position, Scope, UserId,
};
pub use ordering::{PositionConflict, PositionUpdate, Shift, ShiftDirection};
pub use store::{PositionStore, StoreError};
pub use engine::{Applied, BoardRepair, MoveOutcome, OrderingEngine, OrderingError, RepairReport};
pub use memory::MemoryStore;
