// Hub actor: fan-out, slow-client eviction, shutdown teardown

use stats_agent::hub::{Hub, HubClosed, HubHandle, Payload};
use std::time::Duration;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

fn start_hub() -> (HubHandle, CancellationToken, JoinHandle<()>) {
    let shutdown = CancellationToken::new();
    let (hub, handle) = Hub::new(&shutdown);
    let join = tokio::spawn(hub.run(shutdown.clone()));
    (handle, shutdown, join)
}

#[tokio::test]
async fn broadcast_evicts_full_client_and_delivers_to_the_rest() {
    let (hub, _shutdown, _join) = start_hub();

    let (a, mut a_queue) = hub.new_client();
    let (b, mut b_queue) = hub.new_client_with_capacity(1);
    let (c, mut c_queue) = hub.new_client();
    assert!(b.try_enqueue(Payload::from_static("stale")));

    hub.register(a).await.unwrap();
    hub.register(b).await.unwrap();
    hub.register(c).await.unwrap();
    assert_eq!(hub.client_count().await.unwrap(), 3);

    hub.broadcast(Payload::from_static(r#"{"type":"agent_status"}"#))
        .await
        .unwrap();

    let got_a = a_queue.rx.recv().await.unwrap();
    let got_c = c_queue.rx.recv().await.unwrap();
    assert_eq!(got_a.as_str(), r#"{"type":"agent_status"}"#);
    assert_eq!(got_c.as_str(), r#"{"type":"agent_status"}"#);

    // B keeps only what it already had, then sees its queue closed.
    assert_eq!(b_queue.rx.recv().await.unwrap().as_str(), "stale");
    assert!(b_queue.rx.recv().await.is_none());
    assert!(b_queue.token.is_cancelled());

    assert_eq!(hub.client_count().await.unwrap(), 2);
    assert!(matches!(a_queue.rx.try_recv(), Err(TryRecvError::Empty)));
    assert!(matches!(c_queue.rx.try_recv(), Err(TryRecvError::Empty)));
    assert!(!a_queue.token.is_cancelled());
}

#[tokio::test]
async fn every_client_receives_payloads_in_broadcast_order() {
    let (hub, _shutdown, _join) = start_hub();
    let (a, mut a_queue) = hub.new_client();
    hub.register(a).await.unwrap();

    for i in 0..5 {
        hub.broadcast(Payload::from(format!("msg-{i}"))).await.unwrap();
    }
    for i in 0..5 {
        assert_eq!(a_queue.rx.recv().await.unwrap().as_str(), format!("msg-{i}"));
    }
}

#[tokio::test]
async fn unregister_closes_the_client_queue() {
    let (hub, _shutdown, _join) = start_hub();
    let (a, mut a_queue) = hub.new_client();
    let id = a.id();
    hub.register(a).await.unwrap();

    hub.unregister(id).await;
    assert!(a_queue.rx.recv().await.is_none());
    assert!(a_queue.token.is_cancelled());
    assert_eq!(hub.client_count().await.unwrap(), 0);

    // Unknown ids are ignored.
    hub.unregister(id).await;
    assert_eq!(hub.client_count().await.unwrap(), 0);
}

#[tokio::test]
async fn broadcast_without_clients_is_a_no_op() {
    let (hub, _shutdown, _join) = start_hub();
    hub.broadcast(Payload::from_static("nobody")).await.unwrap();
    assert_eq!(hub.client_count().await.unwrap(), 0);
}

#[tokio::test]
async fn shutdown_closes_every_client_before_returning() {
    let (hub, shutdown, join) = start_hub();
    let (a, mut a_queue) = hub.new_client();
    let (b, mut b_queue) = hub.new_client();
    hub.register(a).await.unwrap();
    hub.register(b).await.unwrap();
    assert_eq!(hub.client_count().await.unwrap(), 2);

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(2), join)
        .await
        .expect("hub did not stop")
        .unwrap();

    assert!(a_queue.token.is_cancelled());
    assert!(b_queue.token.is_cancelled());
    assert!(a_queue.rx.recv().await.is_none());
    assert!(b_queue.rx.recv().await.is_none());

    assert_eq!(
        hub.broadcast(Payload::from_static("late")).await,
        Err(HubClosed)
    );
    let (late, _late_queue) = hub.new_client();
    assert_eq!(hub.register(late).await, Err(HubClosed));
}
