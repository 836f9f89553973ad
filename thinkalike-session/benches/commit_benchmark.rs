use std::hint::black_box;

use chrono::Utc;
use criterion::{criterion_group, criterion_main, Criterion};
use serde_json::json;
use thinkalike_session::commit::{derive_commitment, fresh_nonce, SealedChoice};
use thinkalike_session::protocol::{ServerEvent, WireFrame};
use thinkalike_session::session::SessionState;

fn bench_derive_commitment(c: &mut Criterion) {
    let nonce = fresh_nonce().unwrap();

    c.bench_function("derive_commitment", |b| {
        b.iter(|| {
            black_box(derive_commitment(
                black_box(42),
                black_box("round-7f3a"),
                black_box(3),
                black_box(&nonce),
            ));
        })
    });
}

fn bench_fresh_nonce(c: &mut Criterion) {
    c.bench_function("fresh_nonce", |b| {
        b.iter(|| black_box(fresh_nonce().unwrap()))
    });
}

fn bench_seal(c: &mut Criterion) {
    c.bench_function("seal_choice", |b| {
        b.iter(|| black_box(SealedChoice::seal(black_box(42), "round-7f3a", 1).unwrap()))
    });
}

fn bench_decode_deal(c: &mut Criterion) {
    let text = WireFrame::new(
        "deal",
        json!({
            "round_key": "round-7f3a",
            "adjective": "Mysterious",
            "nouns": ["Castle", "Ocean", "Library", "Forest", "Mirror", "Lantern"],
            "selection_deadline": Utc::now().to_rfc3339(),
            "selection_duration": 30,
            "pot": 120.0
        }),
    )
    .encode()
    .unwrap();

    c.bench_function("decode_deal_frame", |b| {
        b.iter(|| {
            let frame = WireFrame::decode(black_box(&text)).unwrap();
            black_box(ServerEvent::from_frame(&frame).unwrap());
        })
    });
}

fn bench_reduce_round(c: &mut Criterion) {
    let deal = ServerEvent::decode(
        "deal",
        &json!({
            "round_key": "round-7f3a",
            "adjective": "Mysterious",
            "nouns": ["Castle", "Ocean"],
            "selection_deadline": Utc::now().to_rfc3339(),
        }),
    )
    .unwrap();
    let update = ServerEvent::decode("commits_update", &json!({"commits_count": 3, "total_players": 8}))
        .unwrap();

    c.bench_function("reduce_deal_and_update", |b| {
        let mut state = SessionState::default();
        b.iter(|| {
            black_box(state.apply(deal.clone()));
            black_box(state.apply(update.clone()));
        })
    });
}

criterion_group!(
    benches,
    bench_derive_commitment,
    bench_fresh_nonce,
    bench_seal,
    bench_decode_deal,
    bench_reduce_round,
);
criterion_main!(benches);
