// Dispatch loop: status heartbeat and snapshot forwarding through the hub

mod common;

use chrono::Utc;
use common::sample;
use stats_agent::collector::snapshot_channel;
use stats_agent::dispatch::Dispatcher;
use stats_agent::hub::{ClientQueue, Hub, HubHandle};
use stats_agent::models::{AgentIdentity, AggregateSnapshot, WireMessage};
use stats_agent::version::VERSION;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(3);

async fn start(shutdown: &CancellationToken) -> (HubHandle, ClientQueue) {
    let (hub, handle) = Hub::new(shutdown);
    tokio::spawn(hub.run(shutdown.clone()));
    let (client, queue) = handle.new_client();
    handle.register(client).await.unwrap();
    (handle, queue)
}

async fn next_message(queue: &mut ClientQueue) -> WireMessage {
    let payload = tokio::time::timeout(WAIT, queue.rx.recv())
        .await
        .expect("timed out waiting for a message")
        .expect("client queue closed");
    serde_json::from_str(payload.as_str()).expect("valid wire message")
}

fn identity() -> AgentIdentity {
    AgentIdentity::new("test-host", Some("staging-a"))
}

#[tokio::test]
async fn status_is_sent_immediately_on_start() {
    let shutdown = CancellationToken::new();
    let (hub, mut queue) = start(&shutdown).await;
    let (_publisher, snapshots) = snapshot_channel(8);
    tokio::spawn(Dispatcher::new(hub, identity()).run(snapshots, shutdown.clone()));

    match next_message(&mut queue).await {
        WireMessage::AgentStatus(status) => {
            assert_eq!(status.agent_id, "test-host");
            assert_eq!(status.agent_label.as_deref(), Some("staging-a"));
            assert_eq!(status.version.as_deref(), Some(VERSION));
            assert_eq!(status.features, vec!["container_stats"]);
            assert!(status.uptime_secs < 5);
        }
        other => panic!("expected agent_status, got {other:?}"),
    }
    shutdown.cancel();
}

#[tokio::test]
async fn status_repeats_on_its_interval() {
    let shutdown = CancellationToken::new();
    let (hub, mut queue) = start(&shutdown).await;
    let (_publisher, snapshots) = snapshot_channel(8);
    let dispatcher =
        Dispatcher::new(hub, identity()).with_status_interval(Duration::from_millis(50));
    tokio::spawn(dispatcher.run(snapshots, shutdown.clone()));

    for _ in 0..3 {
        assert!(matches!(
            next_message(&mut queue).await,
            WireMessage::AgentStatus(_)
        ));
    }
    shutdown.cancel();
}

#[tokio::test]
async fn snapshots_are_forwarded_as_stats_batches() {
    let shutdown = CancellationToken::new();
    let (hub, mut queue) = start(&shutdown).await;
    let (publisher, snapshots) = snapshot_channel(8);
    tokio::spawn(Dispatcher::new(hub, identity()).run(snapshots, shutdown.clone()));
    assert!(matches!(
        next_message(&mut queue).await,
        WireMessage::AgentStatus(_)
    ));

    let snapshot = AggregateSnapshot::new(
        7,
        Utc::now(),
        vec![sample("web", 40.0, 256), sample("db", 70.0, 512)],
    );
    assert!(publisher.publish(Arc::new(snapshot.clone())));

    match next_message(&mut queue).await {
        WireMessage::ContainerStatsBatch(batch) => {
            assert_eq!(batch.sequence, 7);
            assert_eq!(batch.agent_id, "test-host");
            assert_eq!(batch.sent_at, snapshot.sent_at);
            assert_eq!(batch.containers, snapshot.samples);
            assert_eq!(batch.agent_metrics.cpu_pct, 100.0);
            assert_eq!(batch.agent_metrics.mem_bytes, 768);
        }
        other => panic!("expected container_stats_batch, got {other:?}"),
    }
    shutdown.cancel();
}

#[tokio::test]
async fn dispatcher_exits_on_shutdown() {
    let shutdown = CancellationToken::new();
    let (hub, _queue) = start(&shutdown).await;
    let (_publisher, snapshots) = snapshot_channel(8);
    let join = tokio::spawn(Dispatcher::new(hub, identity()).run(snapshots, shutdown.clone()));

    shutdown.cancel();
    tokio::time::timeout(WAIT, join)
        .await
        .expect("dispatcher did not stop")
        .unwrap();
}

#[tokio::test]
async fn full_snapshot_buffer_drops_newest() {
    let (publisher, mut snapshots) = snapshot_channel(1);
    let first = Arc::new(AggregateSnapshot::new(1, Utc::now(), vec![]));
    let second = Arc::new(AggregateSnapshot::new(2, Utc::now(), vec![]));

    assert!(publisher.publish(first));
    assert!(!publisher.publish(second));
    assert_eq!(snapshots.recv().await.unwrap().sequence, 1);
    assert!(snapshots.try_recv().is_err());
}
