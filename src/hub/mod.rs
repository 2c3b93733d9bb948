// Broadcast hub: a single-owner actor fanning payloads out to connected dashboards.
//
// The client set lives inside `Hub::run` only. Everything else talks to it through
// `HubHandle`, whose operations are serialized on one command channel.

mod client;

pub use client::{MAX_MESSAGE_SIZE, PING_INTERVAL, PONG_WAIT, WRITE_WAIT};

use axum::extract::ws::{Utf8Bytes, WebSocket};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Serialized message, shared by every client it is delivered to.
pub type Payload = Utf8Bytes;
pub type ClientId = u64;

/// Per-client outbound queue depth; a client that falls this far behind is evicted.
pub const CLIENT_QUEUE_CAPACITY: usize = 16;
const COMMAND_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("hub is shut down")]
pub struct HubClosed;

/// Hub-side half of a connected client.
pub struct Client {
    id: ClientId,
    queue: mpsc::Sender<Payload>,
    token: CancellationToken,
}

impl Client {
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Non-blocking enqueue. False when the queue is full or closed.
    pub fn try_enqueue(&self, payload: Payload) -> bool {
        self.queue.try_send(payload).is_ok()
    }
}

/// Connection-side half: what the I/O tasks drain and watch.
pub struct ClientQueue {
    pub id: ClientId,
    pub rx: mpsc::Receiver<Payload>,
    /// Cancelled when the hub drops the client or shuts down.
    pub token: CancellationToken,
}

enum Command {
    Register(Client),
    Unregister(ClientId),
    Broadcast(Payload),
    ClientCount(oneshot::Sender<usize>),
}

pub struct Hub {
    commands: mpsc::Receiver<Command>,
    clients: HashMap<ClientId, Client>,
    tracker: TaskTracker,
}

#[derive(Clone)]
pub struct HubHandle {
    commands: mpsc::Sender<Command>,
    next_id: Arc<AtomicU64>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl Hub {
    /// Client tokens are children of `shutdown`.
    pub fn new(shutdown: &CancellationToken) -> (Hub, HubHandle) {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let tracker = TaskTracker::new();
        let hub = Hub {
            commands: rx,
            clients: HashMap::new(),
            tracker: tracker.clone(),
        };
        let handle = HubHandle {
            commands: tx,
            next_id: Arc::new(AtomicU64::new(1)),
            tracker,
            shutdown: shutdown.clone(),
        };
        (hub, handle)
    }

    /// Processes commands until `shutdown` fires, then closes every client and waits for
    /// all client I/O tasks to exit.
    pub async fn run(mut self, shutdown: CancellationToken) {
        tracing::debug!("Hub started");
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => self.handle(cmd),
                    None => break,
                },
            }
        }

        // Refuse further commands so exiting client tasks never block on a full channel.
        self.commands.close();
        let count = self.clients.len();
        for (_, client) in self.clients.drain() {
            client.token.cancel();
        }
        self.tracker.close();
        self.tracker.wait().await;
        tracing::info!(clients = count, "Hub shut down");
    }

    fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Register(client) => {
                if client.token.is_cancelled() {
                    return;
                }
                self.clients.insert(client.id, client);
                tracing::debug!(clients = self.clients.len(), "client connected");
            }
            Command::Unregister(id) => self.disconnect(id),
            Command::Broadcast(payload) => self.broadcast(payload),
            Command::ClientCount(reply) => {
                let _ = reply.send(self.clients.len());
            }
        }
    }

    fn broadcast(&mut self, payload: Payload) {
        tracing::trace!(
            clients = self.clients.len(),
            bytes = payload.as_str().len(),
            "broadcasting payload"
        );
        let slow: Vec<ClientId> = self
            .clients
            .values()
            .filter(|c| !c.try_enqueue(payload.clone()))
            .map(|c| c.id)
            .collect();
        for id in slow {
            tracing::warn!(client_id = id, "client queue full; evicting slow client");
            self.disconnect(id);
        }
    }

    /// Closes the client's queue and signals its I/O tasks. Unknown ids are ignored.
    fn disconnect(&mut self, id: ClientId) {
        if let Some(client) = self.clients.remove(&id) {
            client.token.cancel();
            drop(client);
            tracing::debug!(clients = self.clients.len(), "client disconnected");
        }
    }
}

impl HubHandle {
    /// Creates a client with the default queue depth.
    pub fn new_client(&self) -> (Client, ClientQueue) {
        self.new_client_with_capacity(CLIENT_QUEUE_CAPACITY)
    }

    pub fn new_client_with_capacity(&self, capacity: usize) -> (Client, ClientQueue) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let token = self.shutdown.child_token();
        (
            Client {
                id,
                queue: tx,
                token: token.clone(),
            },
            ClientQueue { id, rx, token },
        )
    }

    pub async fn register(&self, client: Client) -> Result<(), HubClosed> {
        self.commands
            .send(Command::Register(client))
            .await
            .map_err(|_| HubClosed)
    }

    pub async fn unregister(&self, id: ClientId) {
        // Nothing to do if the hub is gone: shutdown already dropped every client.
        let _ = self.commands.send(Command::Unregister(id)).await;
    }

    pub async fn broadcast(&self, payload: Payload) -> Result<(), HubClosed> {
        self.commands
            .send(Command::Broadcast(payload))
            .await
            .map_err(|_| HubClosed)
    }

    pub async fn client_count(&self) -> Result<usize, HubClosed> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::ClientCount(tx))
            .await
            .map_err(|_| HubClosed)?;
        rx.await.map_err(|_| HubClosed)
    }

    /// Registers an upgraded socket and starts its read and write tasks.
    pub async fn attach(&self, socket: WebSocket) {
        client::serve(socket, self.clone()).await;
    }

    pub(crate) fn spawn_io<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tracker.spawn(task);
    }
}
