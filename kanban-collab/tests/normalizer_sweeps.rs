//! Normalizer behavior against stores that fail or stall.

use async_trait::async_trait;
use kanban_collab::{ChangeEvent, EventKind, Hub, HubConfig, NormalizerConfig, PositionNormalizer};
use kanban_core::ordering::ShiftDirection;
use kanban_core::{
    BoardId, Entity, ItemId, ItemKind, MemoryStore, NewItem, OrderingEngine, Position,
    PositionStore, Scope, StoreError,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Delegates to a `MemoryStore`, failing or stalling board-scope listings
/// for selected boards.
struct FaultyStore {
    inner: Arc<MemoryStore>,
    failing: Vec<BoardId>,
    delays: HashMap<BoardId, Duration>,
}

impl FaultyStore {
    fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            failing: Vec::new(),
            delays: HashMap::new(),
        }
    }
}

#[async_trait]
impl PositionStore for FaultyStore {
    async fn list_boards(&self) -> Result<Vec<BoardId>, StoreError> {
        self.inner.list_boards().await
    }

    async fn list_by_scope(&self, scope: Scope) -> Result<Vec<Entity>, StoreError> {
        if let Scope::Board(board) = scope {
            if self.failing.contains(&board) {
                return Err(StoreError::Backend(format!("board {board} unavailable")));
            }
            if let Some(delay) = self.delays.get(&board) {
                tokio::time::sleep(*delay).await;
            }
        }
        self.inner.list_by_scope(scope).await
    }

    async fn get(&self, kind: ItemKind, id: ItemId) -> Result<Entity, StoreError> {
        self.inner.get(kind, id).await
    }

    async fn shift_after(
        &self,
        scope: Scope,
        from: Position,
        direction: ShiftDirection,
    ) -> Result<u64, StoreError> {
        self.inner.shift_after(scope, from, direction).await
    }

    async fn create_at(
        &self,
        scope: Scope,
        position: Position,
        item: NewItem,
    ) -> Result<Entity, StoreError> {
        self.inner.create_at(scope, position, item).await
    }

    async fn update_position(
        &self,
        scope: Scope,
        id: ItemId,
        position: Position,
    ) -> Result<Entity, StoreError> {
        self.inner.update_position(scope, id, position).await
    }

    async fn remove(&self, kind: ItemKind, id: ItemId) -> Result<(), StoreError> {
        self.inner.remove(kind, id).await
    }
}

/// Boards 1..=n, each with one list holding two cards stacked at position 1.
fn corrupted_boards(n: BoardId) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    for board in 1..=n {
        store.seed_list(board, board, format!("list {board}"), 1).unwrap();
        store.seed_card(board, board * 10, "a", 1).unwrap();
        store.seed_card(board, board * 10 + 1, "b", 1).unwrap();
    }
    store
}

fn contiguous(store: &MemoryStore, list: i32) -> bool {
    kanban_core::ordering::is_contiguous(&store.positions(Scope::List(list)).unwrap())
}

#[tokio::test]
async fn test_failing_board_does_not_abort_sweep() {
    let memory = corrupted_boards(3);
    let mut faulty = FaultyStore::new(memory.clone());
    faulty.failing.push(2);

    let (hub, _task) = Hub::spawn(HubConfig::default());
    let job = PositionNormalizer::new(
        OrderingEngine::new(Arc::new(faulty)),
        hub,
        NormalizerConfig::default(),
    );

    let report = job.sweep().await;
    assert_eq!(report.boards, 3);
    assert_eq!(report.failed, 1);
    assert_eq!(report.repaired, 2);
    assert!(contiguous(&memory, 1));
    assert!(!contiguous(&memory, 2));
    assert!(contiguous(&memory, 3));
}

#[tokio::test(start_paused = true)]
async fn test_stuck_board_exceeds_budget_and_sweep_continues() {
    let memory = corrupted_boards(2);
    let mut faulty = FaultyStore::new(memory.clone());
    faulty.delays.insert(1, Duration::from_secs(60));

    let (hub, _task) = Hub::spawn(HubConfig::default());
    let job = PositionNormalizer::new(
        OrderingEngine::new(Arc::new(faulty)),
        hub,
        NormalizerConfig::default(),
    );

    let report = job.sweep().await;
    assert_eq!(report.boards, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.repaired, 1);
    assert!(contiguous(&memory, 2));
}

#[tokio::test(start_paused = true)]
async fn test_stop_waits_for_board_in_flight_then_cancels() {
    let memory = corrupted_boards(3);
    let mut faulty = FaultyStore::new(memory.clone());
    for board in 1..=3 {
        // normalize_board lists the board scope twice.
        faulty.delays.insert(board, Duration::from_secs(1));
    }

    let (hub, _task) = Hub::spawn(HubConfig::default());
    let job = PositionNormalizer::new(
        OrderingEngine::new(Arc::new(faulty)),
        hub,
        NormalizerConfig::default(),
    );

    assert!(job.start().await);
    // Board 1 takes 0..2s, board 2 takes 2..4s.
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(job.stop().await);

    let report = job.last_report().expect("sweep finished before stop returned");
    assert!(report.cancelled);
    assert_eq!(report.boards, 2);
    assert!(contiguous(&memory, 1));
    assert!(contiguous(&memory, 2));
    assert!(!contiguous(&memory, 3));
}

#[tokio::test]
async fn test_repairs_are_broadcast_to_board_viewers() {
    let memory = corrupted_boards(2);
    let (hub, _task) = Hub::spawn(HubConfig::default());
    let (viewer, mut rx) = hub.subscriber(2, 7);
    hub.register(viewer).await.unwrap();

    let job = PositionNormalizer::new(
        OrderingEngine::new(memory.clone()),
        hub.clone(),
        NormalizerConfig::default(),
    );
    job.sweep().await;

    let frame = rx.recv().await.unwrap();
    let event = ChangeEvent::decode(&frame).unwrap();
    assert_eq!(event.event, EventKind::CardMoved);
    assert_eq!(event.data["id"], 21);
    assert_eq!(event.data["board_id"], 2);
    assert_eq!(event.data["list_id"], 2);
    assert_eq!(event.data["position"], 2);
    assert_eq!(event.data["previous"], 1);

    // Only board 2's repair reaches this viewer.
    hub.stats().await.unwrap();
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_unreachable_board_listing_yields_empty_report() {
    struct NoBoards;

    #[async_trait]
    impl PositionStore for NoBoards {
        async fn list_boards(&self) -> Result<Vec<BoardId>, StoreError> {
            Err(StoreError::Backend("connection refused".into()))
        }
        async fn list_by_scope(&self, scope: Scope) -> Result<Vec<Entity>, StoreError> {
            Err(StoreError::ScopeNotFound(scope))
        }
        async fn get(&self, kind: ItemKind, id: ItemId) -> Result<Entity, StoreError> {
            Err(StoreError::NotFound { kind, id })
        }
        async fn shift_after(
            &self,
            scope: Scope,
            _from: Position,
            _direction: ShiftDirection,
        ) -> Result<u64, StoreError> {
            Err(StoreError::ScopeNotFound(scope))
        }
        async fn create_at(
            &self,
            scope: Scope,
            _position: Position,
            _item: NewItem,
        ) -> Result<Entity, StoreError> {
            Err(StoreError::ScopeNotFound(scope))
        }
        async fn update_position(
            &self,
            scope: Scope,
            _id: ItemId,
            _position: Position,
        ) -> Result<Entity, StoreError> {
            Err(StoreError::ScopeNotFound(scope))
        }
        async fn remove(&self, kind: ItemKind, id: ItemId) -> Result<(), StoreError> {
            Err(StoreError::NotFound { kind, id })
        }
    }

    let (hub, _task) = Hub::spawn(HubConfig::default());
    let job = PositionNormalizer::new(
        OrderingEngine::new(Arc::new(NoBoards)),
        hub,
        NormalizerConfig::default(),
    );
    let report = job.sweep().await;
    assert_eq!(report.boards, 0);
    assert!(!report.cancelled);
}
