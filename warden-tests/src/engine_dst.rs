//! Pull engine DST.
//!
//! Runs the engine over a broker that randomly fails fetches and
//! acknowledgments, once per regression seed, and checks the delivery
//! invariants afterwards:
//! - every published message reaches the handler at least once
//! - no message is handed to the handler more than `max_deliver` times
//! - a message is terminated at most once, only on its final delivery,
//!   and only if the handler failed it
//! - nothing is acknowledged after it was terminated

// Test-specific lint allowances.
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::significant_drop_tightening)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::uninlined_format_args)]

use std::collections::BTreeMap;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use warden_broker::{AckKind, BrokerFaultConfig, CallLog, SimulatedBroker};
use warden_consumer::{EngineStatsSnapshot, RunOutcome};
use warden_core::defaults;

use crate::scenarios::seeds::REGRESSION_SEEDS;
use crate::scenarios::{config, Call, Harness, ScriptedHandler, DURABLE, STREAM};

const MESSAGES: u64 = 30;

/// Fails every fourth message on every delivery, and the one after it on
/// its first delivery only.
fn fails(call: &Call) -> bool {
    match call.stream_sequence % 4 {
        0 => true,
        1 => call.delivered == 1,
        _ => false,
    }
}

const fn is_poison(stream_sequence: u64) -> bool {
    stream_sequence % 4 == 0
}

struct Run {
    calls: Vec<Call>,
    log: CallLog,
    stats: EngineStatsSnapshot,
}

async fn run_seed(seed: u64) -> Run {
    let faults = BrokerFaultConfig::none()
        .with_fetch_fail_rate(0.05)
        .with_ack_fail_rate(0.02);
    let broker = SimulatedBroker::with_faults(seed, faults);
    let mut harness = Harness::start(broker.clone(), &config(Duration::from_millis(200)))
        .await
        .unwrap();
    for i in 1..=MESSAGES {
        broker
            .publish(&format!("events.dst.{i}"), format!("payload-{i}"))
            .unwrap();
    }

    let handler = ScriptedHandler::new(fails);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        trigger.cancel();
    });
    let outcome = harness.engine.run(&cancel, &handler).await.unwrap();
    assert_eq!(outcome, RunOutcome::Cancelled, "seed {}", seed);

    Run {
        calls: handler.calls(),
        log: broker.calls(),
        stats: harness.engine.stats().snapshot(),
    }
}

fn check_invariants(seed: u64, run: &Run) {
    let max_deliver = u64::from(defaults::MAX_DELIVER);

    let mut handled: BTreeMap<u64, Vec<u64>> = BTreeMap::new();
    for call in &run.calls {
        handled
            .entry(call.stream_sequence)
            .or_default()
            .push(call.delivered);
    }
    for seq in 1..=MESSAGES {
        let deliveries = handled.get(&seq);
        assert!(
            deliveries.is_some_and(|d| !d.is_empty()),
            "seed {}: message {} never handled",
            seed,
            seq
        );
    }
    for (seq, deliveries) in &handled {
        assert!(
            deliveries.len() as u64 <= max_deliver,
            "seed {}: message {} handled {} times",
            seed,
            seq,
            deliveries.len()
        );
        assert!(
            deliveries.windows(2).all(|w| w[0] < w[1]),
            "seed {}: message {} delivery counts not increasing: {:?}",
            seed,
            seq,
            deliveries
        );
    }

    let mut terminated_at: BTreeMap<u64, usize> = BTreeMap::new();
    for (index, record) in run.log.acks.iter().enumerate() {
        let seq = record.stream_sequence.get();
        if let Some(term_index) = terminated_at.get(&seq) {
            panic!(
                "seed {}: message {} got {:?} at {} after term at {}",
                seed, seq, record.kind, index, term_index
            );
        }
        if record.kind == AckKind::Term {
            assert!(is_poison(seq), "seed {}: healthy message {} terminated", seed, seq);
            assert_eq!(
                record.delivered, max_deliver,
                "seed {}: message {} terminated early",
                seed, seq
            );
            terminated_at.insert(seq, index);
        }
        if record.kind == AckKind::Ack {
            assert!(!is_poison(seq), "seed {}: poison message {} acked", seed, seq);
        }
    }

    assert_eq!(
        run.stats.terminals,
        (1..=MESSAGES).filter(|s| is_poison(*s)).count() as u64,
        "seed {}: every poison message reaches its final delivery",
        seed
    );
}

#[tokio::test(start_paused = true)]
async fn test_dst_engine_flaky_broker_regression_seeds() {
    for &seed in REGRESSION_SEEDS {
        let run = run_seed(seed).await;
        check_invariants(seed, &run);
    }
}

#[tokio::test(start_paused = true)]
async fn test_dst_engine_fault_free_run_is_exact() {
    let broker = SimulatedBroker::new(42);
    let mut harness = Harness::start(broker.clone(), &config(Duration::from_millis(200)))
        .await
        .unwrap();
    for i in 1..=MESSAGES {
        broker.publish(&format!("events.dst.{i}"), "payload").unwrap();
    }
    let handler = ScriptedHandler::new(fails);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(2)).await;
        trigger.cancel();
    });
    harness.engine.run(&cancel, &handler).await.unwrap();

    let log = broker.calls();
    let poison = (1..=MESSAGES).filter(|s| is_poison(*s)).count();
    let flaky_once = (1..=MESSAGES).filter(|s| s % 4 == 1).count();
    assert_eq!(log.acks_of(AckKind::Term).len(), poison);
    assert_eq!(log.acks_of(AckKind::Ack).len(), MESSAGES as usize - poison);
    assert_eq!(log.acks_of(AckKind::Nak).len(), poison * 2 + flaky_once);
    assert_eq!(
        handler.calls().len(),
        MESSAGES as usize + poison * 2 + flaky_once
    );
    assert_eq!(broker.ack_pending(STREAM, DURABLE), 0);
}
