// Per-client WebSocket I/O: one read task, one write task.

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket, close_code};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant, interval_at, timeout, timeout_at};
use tokio_util::sync::CancellationToken;

use super::{ClientId, HubHandle, Payload};

/// Liveness probe cadence.
pub const PING_INTERVAL: Duration = Duration::from_secs(30);
/// Budget for any single frame write.
pub const WRITE_WAIT: Duration = Duration::from_secs(15);
/// Read deadline, extended on every pong.
pub const PONG_WAIT: Duration = Duration::from_secs(60);
/// Largest inbound frame accepted; clients have nothing to say beyond control frames.
pub const MAX_MESSAGE_SIZE: usize = 512;

pub(super) async fn serve(socket: WebSocket, hub: HubHandle) {
    let (client, queue) = hub.new_client();
    let id = client.id();
    let (mut sink, stream) = socket.split();

    if hub.register(client).await.is_err() {
        tracing::debug!(client_id = id, "hub closed; rejecting client");
        let _ = send_with_deadline(&mut sink, close_message("agent shutting down")).await;
        return;
    }
    tracing::info!(client_id = id, "Client connected to stats stream");

    hub.spawn_io(write_pump(sink, queue.rx, queue.token.clone(), hub.clone(), id));
    hub.spawn_io(read_pump(stream, queue.token, hub.clone(), id));
}

async fn read_pump(
    mut stream: SplitStream<WebSocket>,
    token: CancellationToken,
    hub: HubHandle,
    id: ClientId,
) {
    let mut deadline = Instant::now() + PONG_WAIT;
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            frame = timeout_at(deadline, stream.next()) => match frame {
                Err(_) => {
                    tracing::debug!(client_id = id, "read deadline expired");
                    break;
                }
                Ok(None) | Ok(Some(Ok(Message::Close(_)))) => break,
                Ok(Some(Err(e))) => {
                    tracing::debug!(client_id = id, error = %e, "websocket read failed");
                    break;
                }
                Ok(Some(Ok(Message::Pong(_)))) => deadline = Instant::now() + PONG_WAIT,
                // Application data from dashboards is not interpreted.
                Ok(Some(Ok(_))) => {}
            },
        }
    }
    hub.unregister(id).await;
}

async fn write_pump(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Payload>,
    token: CancellationToken,
    hub: HubHandle,
    id: ClientId,
) {
    let mut ping = interval_at(Instant::now() + PING_INTERVAL, PING_INTERVAL);
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                let _ = send_with_deadline(&mut sink, close_message("connection closed by agent")).await;
                break;
            }
            payload = rx.recv() => match payload {
                Some(payload) => {
                    if !send_with_deadline(&mut sink, Message::Text(payload)).await {
                        break;
                    }
                }
                None => {
                    let _ = send_with_deadline(&mut sink, close_message("connection closed by agent")).await;
                    break;
                }
            },
            _ = ping.tick() => {
                if !send_with_deadline(&mut sink, Message::Ping(Bytes::new())).await {
                    break;
                }
            }
        }
    }
    hub.unregister(id).await;
    let _ = timeout(WRITE_WAIT, sink.close()).await;
    tracing::info!(client_id = id, "Client disconnected from stats stream");
}

/// True when the frame was written within [`WRITE_WAIT`].
async fn send_with_deadline(sink: &mut SplitSink<WebSocket, Message>, msg: Message) -> bool {
    matches!(timeout(WRITE_WAIT, sink.send(msg)).await, Ok(Ok(())))
}

fn close_message(reason: &'static str) -> Message {
    Message::Close(Some(CloseFrame {
        code: close_code::AWAY,
        reason: Utf8Bytes::from_static(reason),
    }))
}
