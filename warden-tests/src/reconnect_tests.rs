//! Reconnect behavior of the supervisor and the pull engine together.

// Test-specific lint allowances.
#![allow(clippy::significant_drop_tightening)]
#![allow(clippy::doc_markdown)]

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use warden_broker::{AckKind, FetchRequest, SimulatedBroker};
use warden_consumer::{BatchOutcome, ConsumerError, RunOutcome};
use warden_core::Disposition;

use crate::scenarios::{config, Harness, ScriptedHandler, DURABLE, STREAM};

fn short_fetch() -> FetchRequest {
    FetchRequest {
        batch_size: 10,
        max_wait: Duration::from_millis(50),
    }
}

#[tokio::test]
async fn test_reconnect_engine_rebinds_on_new_session() {
    let broker = SimulatedBroker::new(42);
    let mut harness = Harness::start(broker.clone(), &config(Duration::from_secs(30)))
        .await
        .unwrap();
    let handler = ScriptedHandler::succeeding();
    broker.publish("events.a", "1");
    harness.engine.run_once(&handler).await.unwrap();

    harness.bounce().await;
    assert_eq!(harness.supervisor.session().generation().get(), 2);
    broker.publish("events.b", "2");
    let report = harness.engine.run_once(&handler).await.unwrap();

    assert_eq!(report.dispositions(), vec![Disposition::Ack]);
    let calls = broker.calls();
    assert_eq!(calls.fetches_by_session.get(&1), Some(&1));
    assert_eq!(calls.fetches_by_session.get(&2), Some(&1));
    assert_eq!(calls.acks_of(AckKind::Ack).len(), 2);
}

#[tokio::test]
async fn test_reconnect_in_flight_message_acked_after_restore() {
    let broker = SimulatedBroker::new(42);
    let harness = Harness::start(broker.clone(), &config(Duration::from_secs(30)))
        .await
        .unwrap();
    broker.publish("events.a", "1");
    let session = harness.supervisor.session().session().unwrap();
    let mut subscription = session.pull_subscribe(STREAM, DURABLE).await.unwrap();
    let messages = subscription.fetch(short_fetch()).await.unwrap();
    assert_eq!(messages.len(), 1);

    let link = harness.link();
    link.drop_connection();
    assert!(messages[0].ack().await.is_err());

    link.restore_connection();
    crate::scenarios::settle().await;
    messages[0].ack().await.unwrap();

    assert_eq!(broker.ack_pending(STREAM, DURABLE), 0);
    assert_eq!(broker.calls().acks_of(AckKind::Ack).len(), 1);
}

#[tokio::test]
async fn test_reconnect_failed_rederivation_fails_fast() {
    let broker = SimulatedBroker::new(42);
    let mut harness = Harness::start(broker.clone(), &config(Duration::from_secs(30)))
        .await
        .unwrap();
    broker.fault_config().force_session_fail = true;
    harness.bounce().await;

    let slot = harness.supervisor.session();
    assert!(slot.is_stale());
    assert!(matches!(
        slot.session(),
        Err(ConsumerError::StaleSession { .. })
    ));

    broker.publish("events.a", "1");
    let handler = ScriptedHandler::succeeding();
    let fetches_before = broker.calls().fetches;
    let report = harness.engine.run_once(&handler).await.unwrap();

    assert_eq!(report.outcome, BatchOutcome::FetchFailed);
    assert_eq!(broker.calls().fetches, fetches_before);
    assert!(handler.calls().is_empty());
    assert_eq!(harness.engine.stats().snapshot().fetch_errors, 1);

    // The next reconnect recovers and consumption resumes.
    harness.bounce().await;
    assert!(!harness.supervisor.session().is_stale());
    let report = harness.engine.run_once(&handler).await.unwrap();

    assert_eq!(report.dispositions(), vec![Disposition::Ack]);
    assert_eq!(broker.calls().fetches_by_session.get(&2), Some(&1));
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_stale_session_backs_off() {
    let broker = SimulatedBroker::new(42);
    let mut harness = Harness::start(broker.clone(), &config(Duration::from_secs(30)))
        .await
        .unwrap();
    broker.fault_config().force_session_fail = true;
    harness.bounce().await;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(250)).await;
        trigger.cancel();
    });
    let outcome = harness
        .engine
        .run(&cancel, &ScriptedHandler::succeeding())
        .await
        .unwrap();

    assert_eq!(outcome, RunOutcome::Cancelled);
    let stats = harness.engine.stats().snapshot();
    assert_eq!(stats.fetches, 0);
    assert_eq!(stats.fetch_errors, 3);
    assert_eq!(stats.backoffs, 3);
}
