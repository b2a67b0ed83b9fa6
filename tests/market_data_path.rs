// tests/market_data_path.rs
//! The market data pipeline from the engine's update stream through the
//! publisher's sequencing, the snapshot synthesizer, and the consumer's
//! recovery splice, ending in a client book replica that mirrors the
//! exchange book.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tradecore::engine::MatchingEngine;
use tradecore::messages::{ClientRequest, MarketUpdate, RequestKind, SeqMarketUpdate, UpdateKind};
use tradecore::consumer::RecoveryState;
use tradecore::replica::MarketBooks;
use tradecore::spsc::SpscQueue;
use tradecore::synthesizer::SnapshotState;
use tradecore::types::Side;

fn new_order(client_id: u32, order_id: u64, ticker: u32, side: Side, price: i64, qty: u32) -> ClientRequest {
    ClientRequest {
        kind: RequestKind::New,
        client_id,
        ticker_id: ticker,
        order_id,
        side,
        price,
        qty,
    }
}

fn drain<T>(q: &SpscQueue<T>) -> Vec<T> {
    std::iter::from_fn(|| q.pop()).collect()
}

/// Run a small order flow through a real engine and hand back the update
/// stream framed exactly as the publisher would emit it.
fn engine_update_stream(requests_in: Vec<ClientRequest>) -> Vec<SeqMarketUpdate> {
    let requests = Arc::new(SpscQueue::new(256));
    let responses = Arc::new(SpscQueue::new(256));
    let updates = Arc::new(SpscQueue::new(256));
    let mut engine =
        MatchingEngine::new(2, 64, requests.clone(), responses.clone(), updates.clone());
    for r in requests_in {
        requests.push(r).unwrap();
    }
    engine.start();
    let deadline = Instant::now() + Duration::from_secs(5);
    while !requests.is_empty() && Instant::now() < deadline {
        std::thread::yield_now();
    }
    engine.stop();
    drain(&responses);
    drain(&updates)
        .into_iter()
        .zip(1u64..)
        .map(|(update, n_seq)| SeqMarketUpdate { n_seq, update })
        .collect()
}

#[test]
fn snapshot_replays_into_the_same_book_as_the_incremental_stream() {
    let frames = engine_update_stream(vec![
        new_order(1, 1, 0, Side::Buy, 100, 50),
        new_order(1, 2, 0, Side::Buy, 99, 30),
        new_order(2, 1, 0, Side::Sell, 105, 40),
        new_order(2, 2, 1, Side::Sell, 205, 10),
        // a trade thins out the book before the snapshot
        new_order(3, 1, 0, Side::Buy, 105, 15),
    ]);

    // replica A consumes the live incremental stream
    let mut live = MarketBooks::new(2);
    let mut synth = SnapshotState::new(2);
    for frame in &frames {
        live.apply(&frame.update);
        synth.apply(frame);
    }

    // replica B starts empty and consumes only the snapshot
    let mut recovered = MarketBooks::new(2);
    for frame in synth.build_snapshot() {
        match frame.update.kind {
            UpdateKind::SnapshotStart | UpdateKind::SnapshotEnd => {}
            _ => {
                recovered.apply(&frame.update);
            }
        }
    }

    for ticker in 0..2u32 {
        assert_eq!(
            live.book(ticker).bbo(),
            recovered.book(ticker).bbo(),
            "ticker {ticker} top of book diverged"
        );
        assert_eq!(
            live.book(ticker).order_count(),
            recovered.book(ticker).order_count(),
            "ticker {ticker} live order count diverged"
        );
        assert_eq!(live.book(ticker).top_n(8), recovered.book(ticker).top_n(8));
    }
}

#[test]
fn recovery_output_equals_the_unlost_prefix() {
    // Recovery law: consumer loses some incrementals, recovers via the
    // snapshot, and its post-recovery book equals a consumer that saw
    // everything.
    let frames = engine_update_stream(vec![
        new_order(1, 1, 0, Side::Buy, 100, 50),
        new_order(1, 2, 0, Side::Sell, 110, 20),
        new_order(2, 1, 0, Side::Buy, 101, 10),
        new_order(2, 2, 0, Side::Sell, 101, 25), // trades 10, rests 15
        new_order(3, 1, 0, Side::Buy, 99, 5),
    ]);
    assert!(frames.len() >= 6, "flow must span the loss point");

    // lossless consumer
    let mut reference = MarketBooks::new(2);
    for f in &frames {
        reference.apply(&f.update);
    }

    // lossy consumer: sees frames 1..=2, loses 3..=4, sees the tail
    let out = Arc::new(SpscQueue::new(256));
    let mut consumer = RecoveryState::new(out.clone());
    let lost = 3..=4u64;
    let mut synth = SnapshotState::new(2);
    let snapshot_at = 4; // synthesizer had folded everything up to n_seq 4

    for f in &frames {
        if f.n_seq <= snapshot_at {
            synth.apply(f);
        }
    }
    for f in &frames {
        if lost.contains(&f.n_seq) {
            continue;
        }
        consumer.on_incremental(f);
        if consumer.in_recovery() && f.n_seq == snapshot_at + 1 {
            // snapshot multicast delivers a full snapshot with anchor 4
            for s in synth.build_snapshot() {
                consumer.on_snapshot(&s);
            }
        }
    }
    assert!(!consumer.in_recovery(), "splice must complete");

    let mut recovered = MarketBooks::new(2);
    for u in drain(&out) {
        match u.kind {
            UpdateKind::Trade => {}
            _ => {
                recovered.apply(&u);
            }
        }
    }
    assert_eq!(reference.book(0).bbo(), recovered.book(0).bbo());
    assert_eq!(reference.book(0).order_count(), recovered.book(0).order_count());
    assert_eq!(reference.book(0).top_n(8), recovered.book(0).top_n(8));
}

#[test]
fn empty_exchange_snapshot_has_the_documented_framing() {
    let synth = SnapshotState::new(8);
    let frames = synth.build_snapshot();
    assert_eq!(frames.len(), 10);
    assert_eq!(frames[0].update.kind, UpdateKind::SnapshotStart);
    assert_eq!(frames[0].n_seq, 0);
    for (i, f) in frames.iter().enumerate().skip(1).take(8) {
        assert_eq!(f.update.kind, UpdateKind::Clear);
        assert_eq!(f.update.ticker_id as usize, i - 1);
        assert_eq!(f.n_seq, i as u64);
    }
    assert_eq!(frames[9].update.kind, UpdateKind::SnapshotEnd);
    assert_eq!(frames[9].n_seq, 9);
}

#[test]
fn trades_flow_through_recovery_untouched() {
    let out = Arc::new(SpscQueue::new(64));
    let mut consumer = RecoveryState::new(out.clone());
    consumer.on_incremental(&SeqMarketUpdate {
        n_seq: 1,
        update: MarketUpdate {
            kind: UpdateKind::Trade,
            ticker_id: 0,
            side: Side::Buy,
            price: 100,
            qty: 7,
            ..Default::default()
        },
    });
    let got = drain(&out);
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].kind, UpdateKind::Trade);
    assert_eq!(got[0].qty, 7);
}
