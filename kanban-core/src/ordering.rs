//! Position arithmetic for ordered sibling collections.
//!
//! Every function here is pure: it takes the current `(id, position)` pairs of
//! one scope and returns the shifts or updates that keep the scope contiguous.
//! Executing them against storage is the job of [`crate::engine`].
//!
//! Contiguous invariant: positions in a scope are exactly `1..=N`, one item
//! per slot.
//!
//! ```text
//! insert at 2           delete at 2           move 1 -> 3
//! [a:1 b:2 c:3]         [a:1 b:2 c:3]         [a:1 b:2 c:3]
//!  Up   from 2           remove b              Down from 1   -> [a:1 b:1 c:2]
//! [a:1 b:3 c:4]          Down from 2           Up   from 3   -> (nothing >= 3)
//!  create x at 2        [a:1 c:2]              place a at 3  -> [b:1 c:2 a:3]
//! [a:1 x:2 b:3 c:4]
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::model::{ItemId, OrderedItem, Position, Scope};

/// Direction of a bulk position shift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShiftDirection {
    /// Increment every item with `position >= from` (open a slot).
    Up,
    /// Decrement every item with `position > from` (close a slot).
    Down,
}

impl ShiftDirection {
    /// Whether an item at `position` is affected by a shift starting at `from`.
    pub fn affects(&self, position: Position, from: Position) -> bool {
        match self {
            Self::Up => position >= from,
            Self::Down => position > from,
        }
    }

    pub fn delta(&self) -> Position {
        match self {
            Self::Up => 1,
            Self::Down => -1,
        }
    }
}

/// One bulk shift the storage collaborator applies atomically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shift {
    pub scope: Scope,
    pub from: Position,
    pub direction: ShiftDirection,
}

impl Shift {
    pub fn up(scope: Scope, from: Position) -> Self {
        Self {
            scope,
            from,
            direction: ShiftDirection::Up,
        }
    }

    pub fn down(scope: Scope, from: Position) -> Self {
        Self {
            scope,
            from,
            direction: ShiftDirection::Down,
        }
    }

    /// Apply to an in-memory projection of the same scope.
    pub fn apply(&self, items: &mut [OrderedItem]) -> usize {
        let mut affected = 0;
        for item in items.iter_mut() {
            if self.direction.affects(item.position, self.from) {
                item.position += self.direction.delta();
                affected += 1;
            }
        }
        affected
    }
}

/// Clamp a requested insert slot to `[1, len + 1]`.
pub fn clamp_insert(requested: Position, len: usize) -> Position {
    let max = len as Position + 1;
    requested.clamp(1, max)
}

/// Clamp a move destination to `[1, dest_len + 1]`.
///
/// `dest_len` counts the destination scope without the moving item, so a
/// same-scope move in a scope of `N` items clamps to `[1, N]`.
pub fn clamp_move(requested: Position, dest_len: usize) -> Position {
    clamp_insert(requested, dest_len)
}

/// Steps for inserting into a scope currently holding `len` items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertPlan {
    pub shift: Shift,
    pub position: Position,
}

pub fn plan_insert(scope: Scope, requested: Position, len: usize) -> InsertPlan {
    let position = clamp_insert(requested, len);
    InsertPlan {
        shift: Shift::up(scope, position),
        position,
    }
}

/// The shift closing the slot left behind by a removed item.
pub fn plan_delete(scope: Scope, position: Position) -> Shift {
    Shift::down(scope, position)
}

/// Steps for moving one item, run in order: `close`, `open`, then place the
/// item at `target` in `to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MovePlan {
    pub close: Shift,
    pub open: Shift,
    pub to: Scope,
    pub target: Position,
}

/// Plan a move of the item at `from_position` in `from` to `requested` in `to`.
///
/// `dest_len` is the size of `to` excluding the moving item. Returns `None`
/// when the move would leave the item where it is.
pub fn plan_move(
    from: Scope,
    from_position: Position,
    to: Scope,
    requested: Position,
    dest_len: usize,
) -> Option<MovePlan> {
    let target = clamp_move(requested, dest_len);
    if from == to && target == from_position {
        return None;
    }
    Some(MovePlan {
        close: Shift::down(from, from_position),
        open: Shift::up(to, target),
        to,
        target,
    })
}

/// A violation of the contiguous invariant found by [`find_conflicts`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PositionConflict {
    /// More than one item holds `position`.
    Duplicate { position: Position, count: usize },
    /// No item holds `position`, although it lies inside `1..=N`.
    Gap { position: Position },
}

/// Count occurrences of every position and report duplicates and gaps.
///
/// Duplicates come first, in ascending position order, then gaps.
pub fn find_conflicts(items: &[OrderedItem]) -> Vec<PositionConflict> {
    let mut counts: BTreeMap<Position, usize> = BTreeMap::new();
    for item in items {
        *counts.entry(item.position).or_insert(0) += 1;
    }

    let mut conflicts: Vec<PositionConflict> = counts
        .iter()
        .filter(|(_, count)| **count > 1)
        .map(|(position, count)| PositionConflict::Duplicate {
            position: *position,
            count: *count,
        })
        .collect();

    let n = items.len() as Position;
    conflicts.extend(
        (1..=n)
            .filter(|p| !counts.contains_key(p))
            .map(|position| PositionConflict::Gap { position }),
    );
    conflicts
}

pub fn has_duplicates(items: &[OrderedItem]) -> bool {
    let mut seen = std::collections::HashSet::with_capacity(items.len());
    items.iter().any(|item| !seen.insert(item.position))
}

pub fn is_contiguous(items: &[OrderedItem]) -> bool {
    find_conflicts(items).is_empty()
}

/// A single position rewrite produced by [`normalize_plan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionUpdate {
    pub id: ItemId,
    pub from: Position,
    pub to: Position,
}

/// Renumber a scope to `1..=N` by current relative order.
///
/// Items sort by `(position, id)`, so duplicates keep identity order. Only
/// items whose position changes are returned; an already contiguous scope
/// yields an empty plan.
pub fn normalize_plan(items: &[OrderedItem]) -> Vec<PositionUpdate> {
    let mut sorted: Vec<OrderedItem> = items.to_vec();
    sorted.sort_by_key(|item| (item.position, item.id));

    sorted
        .iter()
        .enumerate()
        .filter_map(|(index, item)| {
            let to = index as Position + 1;
            (item.position != to).then_some(PositionUpdate {
                id: item.id,
                from: item.position,
                to,
            })
        })
        .collect()
}

/// Apply a normalize plan to an in-memory projection.
pub fn apply_updates(items: &mut [OrderedItem], updates: &[PositionUpdate]) {
    for update in updates {
        if let Some(item) = items.iter_mut().find(|i| i.id == update.id) {
            item.position = update.to;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCOPE: Scope = Scope::List(1);

    fn items(pairs: &[(ItemId, Position)]) -> Vec<OrderedItem> {
        pairs.iter().map(|&(id, pos)| OrderedItem::new(id, pos)).collect()
    }

    fn by_position(items: &[OrderedItem]) -> Vec<ItemId> {
        let mut sorted = items.to_vec();
        sorted.sort_by_key(|i| i.position);
        sorted.iter().map(|i| i.id).collect()
    }

    #[test]
    fn test_clamp_insert() {
        assert_eq!(clamp_insert(0, 3), 1);
        assert_eq!(clamp_insert(-5, 3), 1);
        assert_eq!(clamp_insert(2, 3), 2);
        assert_eq!(clamp_insert(4, 3), 4);
        assert_eq!(clamp_insert(99, 3), 4);
        assert_eq!(clamp_insert(7, 0), 1);
    }

    #[test]
    fn test_clamp_move_same_scope() {
        // 3 items, moving one: destination holds 2 others.
        assert_eq!(clamp_move(10, 2), 3);
        assert_eq!(clamp_move(0, 2), 1);
    }

    #[test]
    fn test_insert_in_middle() {
        let mut scope = items(&[(1, 1), (2, 2), (3, 3)]);
        let plan = plan_insert(SCOPE, 2, scope.len());
        assert_eq!(plan.position, 2);

        assert_eq!(plan.shift.apply(&mut scope), 2);
        scope.push(OrderedItem::new(100, plan.position));

        assert_eq!(by_position(&scope), vec![1, 100, 2, 3]);
        assert!(is_contiguous(&scope));
    }

    #[test]
    fn test_insert_past_end_is_appended() {
        let mut scope = items(&[(1, 1), (2, 2)]);
        let plan = plan_insert(SCOPE, 50, scope.len());
        assert_eq!(plan.position, 3);
        assert_eq!(plan.shift.apply(&mut scope), 0);
        scope.push(OrderedItem::new(9, plan.position));
        assert!(is_contiguous(&scope));
    }

    #[test]
    fn test_delete_renumbers_tail() {
        let mut scope = items(&[(1, 1), (2, 2), (3, 3)]);
        scope.retain(|i| i.id != 2);
        plan_delete(SCOPE, 2).apply(&mut scope);

        assert_eq!(scope, items(&[(1, 1), (3, 2)]));
    }

    #[test]
    fn test_move_first_to_last() {
        let mut scope = items(&[(1, 1), (2, 2), (3, 3)]);
        let plan = plan_move(SCOPE, 1, SCOPE, 3, 2).unwrap();
        assert_eq!(plan.target, 3);

        plan.close.apply(&mut scope);
        plan.open.apply(&mut scope);
        scope.iter_mut().find(|i| i.id == 1).unwrap().position = plan.target;

        assert_eq!(by_position(&scope), vec![2, 3, 1]);
        assert!(is_contiguous(&scope));
    }

    #[test]
    fn test_move_last_to_first() {
        let mut scope = items(&[(1, 1), (2, 2), (3, 3)]);
        let plan = plan_move(SCOPE, 3, SCOPE, 1, 2).unwrap();

        plan.close.apply(&mut scope);
        plan.open.apply(&mut scope);
        scope.iter_mut().find(|i| i.id == 3).unwrap().position = plan.target;

        assert_eq!(by_position(&scope), vec![3, 1, 2]);
    }

    #[test]
    fn test_move_onto_same_slot_is_noop() {
        assert!(plan_move(SCOPE, 2, SCOPE, 2, 2).is_none());
        // Clamped onto the current slot is a no-op too.
        assert!(plan_move(SCOPE, 3, SCOPE, 40, 2).is_none());
    }

    #[test]
    fn test_move_across_scopes() {
        let other = Scope::List(2);
        let mut src = items(&[(1, 1), (2, 2), (3, 3)]);
        let mut dst = items(&[(10, 1), (11, 2)]);

        let plan = plan_move(SCOPE, 2, other, 1, dst.len()).unwrap();
        src.retain(|i| i.id != 2);
        plan.close.apply(&mut src);
        plan.open.apply(&mut dst);
        dst.push(OrderedItem::new(2, plan.target));

        assert!(is_contiguous(&src));
        assert!(is_contiguous(&dst));
        assert_eq!(by_position(&dst), vec![2, 10, 11]);
    }

    #[test]
    fn test_find_conflicts_duplicate_and_gap() {
        let scope = items(&[(1, 1), (2, 1), (3, 3)]);
        assert_eq!(
            find_conflicts(&scope),
            vec![
                PositionConflict::Duplicate {
                    position: 1,
                    count: 2
                },
                PositionConflict::Gap { position: 2 },
            ]
        );
        assert!(has_duplicates(&scope));
    }

    #[test]
    fn test_find_conflicts_gap_only() {
        let scope = items(&[(1, 1), (2, 4)]);
        assert_eq!(
            find_conflicts(&scope),
            vec![PositionConflict::Gap { position: 2 }]
        );
        assert!(!has_duplicates(&scope));
        assert!(!is_contiguous(&scope));
    }

    #[test]
    fn test_contiguous_scope_has_no_conflicts() {
        assert!(find_conflicts(&items(&[(5, 2), (4, 1), (6, 3)])).is_empty());
        assert!(find_conflicts(&[]).is_empty());
    }

    #[test]
    fn test_normalize_repairs_duplicate_and_gap() {
        let mut scope = items(&[(1, 1), (2, 1), (3, 3)]);
        let plan = normalize_plan(&scope);
        assert_eq!(plan, vec![PositionUpdate { id: 2, from: 1, to: 2 }]);

        apply_updates(&mut scope, &plan);
        assert_eq!(scope, items(&[(1, 1), (2, 2), (3, 3)]));
    }

    #[test]
    fn test_normalize_breaks_ties_by_id() {
        let scope = items(&[(9, 2), (4, 2), (7, 0)]);
        let plan = normalize_plan(&scope);
        let mut repaired = scope.clone();
        apply_updates(&mut repaired, &plan);
        assert_eq!(by_position(&repaired), vec![7, 4, 9]);
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let mut scope = items(&[(1, 7), (2, 7), (3, -1), (4, 12), (5, 3)]);
        let first = normalize_plan(&scope);
        apply_updates(&mut scope, &first);
        let snapshot = scope.clone();

        assert!(normalize_plan(&scope).is_empty());
        assert_eq!(scope, snapshot);
        assert!(is_contiguous(&scope));
    }
}
