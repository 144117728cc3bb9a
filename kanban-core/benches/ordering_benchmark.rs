use criterion::{criterion_group, criterion_main, Criterion};
use kanban_core::ordering::{find_conflicts, normalize_plan, plan_insert};
use kanban_core::{OrderedItem, Scope};
use std::hint::black_box;

fn scrambled(n: i32) -> Vec<OrderedItem> {
    // Every third item collides with its predecessor, leaving gaps behind.
    (1..=n)
        .map(|id| {
            let position = if id % 3 == 0 { id - 1 } else { id };
            OrderedItem::new(id, position)
        })
        .collect()
}

fn bench_find_conflicts(c: &mut Criterion) {
    let items = scrambled(1_000);
    c.bench_function("find_conflicts_1k", |b| {
        b.iter(|| black_box(find_conflicts(black_box(&items))))
    });
}

fn bench_normalize_plan(c: &mut Criterion) {
    let items = scrambled(1_000);
    c.bench_function("normalize_plan_1k", |b| {
        b.iter(|| black_box(normalize_plan(black_box(&items))))
    });
}

fn bench_insert_shift(c: &mut Criterion) {
    let items: Vec<OrderedItem> = (1..=1_000).map(|id| OrderedItem::new(id, id)).collect();
    c.bench_function("insert_shift_apply_1k", |b| {
        b.iter(|| {
            let mut scope = items.clone();
            let plan = plan_insert(Scope::List(1), 500, scope.len());
            black_box(plan.shift.apply(&mut scope));
        })
    });
}

criterion_group!(
    benches,
    bench_find_conflicts,
    bench_normalize_plan,
    bench_insert_shift
);
criterion_main!(benches);
