use criterion::{criterion_group, criterion_main, Criterion};
use kanban_collab::{ChangeEvent, Hub, HubConfig};
use kanban_core::{Card, Entity};
use std::hint::black_box;
use std::sync::Arc;

fn bench_event_encode(c: &mut Criterion) {
    let event = ChangeEvent::moved(Entity::Card(Card {
        id: 42,
        list_id: 7,
        title: "Ship the release".into(),
        description: Some("Tag, build, publish".into()),
        position: 3,
    }));
    c.bench_function("change_event_encode", |b| {
        b.iter(|| black_box(event.encode().unwrap()))
    });
}

fn bench_fanout_100_peers(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let (hub, mut receivers) = rt.block_on(async {
        let (hub, _task) = Hub::spawn(HubConfig {
            queue_capacity: 1024,
            ..HubConfig::default()
        });
        let mut receivers = Vec::new();
        for user in 0..100 {
            let (sub, rx) = hub.subscriber(1, user);
            hub.register(sub).await.unwrap();
            receivers.push(rx);
        }
        (hub, receivers)
    });
    let payload: Arc<str> = Arc::from(r#"{"event":"card_moved","data":{"id":1,"position":2}}"#);

    c.bench_function("hub_fanout_100_peers", |b| {
        b.iter(|| {
            rt.block_on(async {
                hub.broadcast_raw(1, payload.clone()).await.unwrap();
                hub.stats().await.unwrap();
            });
            for rx in receivers.iter_mut() {
                while rx.try_recv().is_ok() {}
            }
        })
    });
}

criterion_group!(benches, bench_event_encode, bench_fanout_100_peers);
criterion_main!(benches);
