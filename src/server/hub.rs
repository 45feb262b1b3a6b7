use crate::domain::HubEvent;
use futures_util::Stream;
use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct Connection {
    tx: mpsc::UnboundedSender<HubEvent>,
    heartbeat: JoinHandle<()>,
}

impl Connection {
    // Dropping `tx` ends the connection's event stream.
    fn close(self) {
        self.heartbeat.abort();
    }
}

/// Registry of open event-stream connections and the fan-out over them.
///
/// Every enqueue happens under the registry lock, so events for one
/// connection land in its queue in the order they were produced. The lock is
/// a plain `std` mutex: it is never held across an await, and it has to be
/// usable from the filesystem watcher thread and from `Drop`.
pub struct BroadcastHub {
    next_id: AtomicU64,
    connections: Mutex<HashMap<ConnectionId, Connection>>,
    // Only written while the registry lock is held.
    closed: AtomicBool,
    heartbeat_interval: Duration,
}

impl BroadcastHub {
    pub fn new(heartbeat_interval: Duration) -> Self {
        Self {
            next_id: AtomicU64::new(0),
            connections: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            heartbeat_interval,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConnectionId, Connection>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a new connection and queues its `connected` event. After
    /// `shutdown` the returned stream is already ended and nothing is
    /// registered.
    ///
    /// Must be called from within a tokio runtime: the connection's heartbeat
    /// runs as a spawned task.
    pub fn register(self: &Arc<Self>) -> EventStream {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let (tx, rx) = mpsc::unbounded_channel::<HubEvent>();

        let mut connections = self.lock();
        if self.closed.load(Ordering::Acquire) {
            drop(connections);
            drop(tx);
            tracing::debug!(conn_id = %id, "rejected event stream after shutdown");
            return EventStream {
                id,
                rx,
                hub: Arc::downgrade(self),
            };
        }

        let heartbeat = tokio::spawn(run_heartbeat(
            Arc::downgrade(self),
            id,
            self.heartbeat_interval,
        ));
        let _ = tx.send(HubEvent::Connected {
            client_id: id.to_string(),
        });
        connections.insert(id, Connection { tx, heartbeat });
        let count = connections.len();
        drop(connections);
        tracing::info!(conn_id = %id, connections = count, "event stream opened");

        EventStream {
            id,
            rx,
            hub: Arc::downgrade(self),
        }
    }

    /// Removes a connection and ends its stream. Returns false if it was
    /// already gone.
    pub fn unregister(&self, id: ConnectionId) -> bool {
        let removed = self.lock().remove(&id);
        match removed {
            Some(connection) => {
                connection.close();
                tracing::info!(conn_id = %id, "event stream closed");
                true
            }
            None => false,
        }
    }

    /// Queues `event` on every registered connection. Connections whose
    /// stream is gone are dropped from the registry; the rest still receive
    /// the event. Returns the number of connections the event was queued on.
    pub fn broadcast(&self, event: HubEvent) -> usize {
        let mut closed = Vec::new();
        let delivered = {
            let mut connections = self.lock();
            let mut delivered = 0usize;
            let mut failed = Vec::new();
            for (id, connection) in connections.iter() {
                if connection.tx.send(event.clone()).is_ok() {
                    delivered += 1;
                } else {
                    failed.push(*id);
                }
            }
            for id in failed {
                if let Some(connection) = connections.remove(&id) {
                    closed.push((id, connection));
                }
            }
            delivered
        };

        for (id, connection) in closed {
            connection.close();
            tracing::debug!(conn_id = %id, "dropped event stream after failed send");
        }
        tracing::debug!(event = event.kind(), delivered, "broadcast");
        delivered
    }

    /// Queues `event` on one connection only if it is still registered.
    pub fn send_to(&self, id: ConnectionId, event: HubEvent) -> bool {
        let failed = {
            let mut connections = self.lock();
            let Some(connection) = connections.get(&id) else {
                return false;
            };
            if connection.tx.send(event).is_ok() {
                return true;
            }
            connections.remove(&id)
        };

        if let Some(connection) = failed {
            connection.close();
            tracing::debug!(conn_id = %id, "dropped event stream after failed send");
        }
        false
    }

    #[cfg(test)]
    pub fn is_registered(&self, id: ConnectionId) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn connection_count(&self) -> usize {
        self.lock().len()
    }

    /// Ends every open stream, clears the registry and refuses later
    /// registrations.
    pub fn shutdown(&self) {
        let drained: Vec<(ConnectionId, Connection)> = {
            let mut connections = self.lock();
            self.closed.store(true, Ordering::Release);
            connections.drain().collect()
        };
        let count = drained.len();
        for (_, connection) in drained {
            connection.close();
        }
        tracing::info!(connections = count, "closed all event streams");
    }
}

async fn run_heartbeat(hub: Weak<BroadcastHub>, id: ConnectionId, period: Duration) {
    let mut ticker = interval_at(Instant::now() + period, period);
    loop {
        ticker.tick().await;
        let Some(hub) = hub.upgrade() else {
            return;
        };
        if !hub.send_to(id, HubEvent::heartbeat()) {
            return;
        }
    }
}

/// Receiving side of one connection. Dropping it unregisters the connection,
/// which is how a client disconnect reaches the hub.
pub struct EventStream {
    id: ConnectionId,
    rx: mpsc::UnboundedReceiver<HubEvent>,
    hub: Weak<BroadcastHub>,
}

impl EventStream {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Stream for EventStream {
    type Item = HubEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<HubEvent>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.unregister(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FileChangeKind;
    use futures_util::StreamExt as _;

    fn hub() -> Arc<BroadcastHub> {
        Arc::new(BroadcastHub::new(Duration::from_secs(30)))
    }

    fn change(filename: &str) -> HubEvent {
        HubEvent::file_change(FileChangeKind::Modify, filename.to_string())
    }

    #[tokio::test]
    async fn register_assigns_increasing_ids_and_sends_connected() {
        let hub = hub();
        let mut first = hub.register();
        let mut second = hub.register();
        assert!(second.id() > first.id());
        assert_eq!(hub.connection_count(), 2);

        assert_eq!(
            first.next().await,
            Some(HubEvent::Connected {
                client_id: first.id().to_string()
            })
        );
        assert_eq!(
            second.next().await,
            Some(HubEvent::Connected {
                client_id: second.id().to_string()
            })
        );
    }

    #[tokio::test]
    async fn broadcast_preserves_per_connection_order() {
        let hub = hub();
        let mut stream = hub.register();
        let _ = stream.next().await;

        for name in ["a.jsonl", "b.jsonl", "c.jsonl"] {
            assert_eq!(hub.broadcast(change(name)), 1);
        }
        let mut names = Vec::new();
        for _ in 0..3 {
            match stream.next().await {
                Some(HubEvent::FileChange { filename, .. }) => names.push(filename),
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert_eq!(names, vec!["a.jsonl", "b.jsonl", "c.jsonl"]);
    }

    #[tokio::test]
    async fn broadcast_isolates_closed_connection() {
        let hub = hub();
        let mut streams: Vec<EventStream> = (0..3).map(|_| hub.register()).collect();
        for stream in &mut streams {
            let _ = stream.next().await;
        }

        // Transport gone without the stream being dropped yet.
        let closed_id = streams[1].id();
        streams[1].rx.close();

        assert_eq!(hub.broadcast(change("demo/s1.jsonl")), 2);
        assert_eq!(hub.connection_count(), 2);
        assert!(!hub.is_registered(closed_id));

        for index in [0, 2] {
            match streams[index].next().await {
                Some(HubEvent::FileChange { filename, .. }) => {
                    assert_eq!(filename, "demo/s1.jsonl");
                }
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn unregister_is_idempotent_and_ends_stream() {
        let hub = hub();
        let mut stream = hub.register();
        let id = stream.id();

        assert!(hub.unregister(id));
        assert!(!hub.unregister(id));
        assert!(!hub.send_to(id, HubEvent::heartbeat()));

        // The queued `connected` event is still drained before the end.
        assert!(matches!(
            stream.next().await,
            Some(HubEvent::Connected { .. })
        ));
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn dropping_stream_unregisters_connection() {
        let hub = hub();
        let stream = hub.register();
        let id = stream.id();
        assert!(hub.is_registered(id));

        drop(stream);
        assert!(!hub.is_registered(id));
        assert_eq!(hub.broadcast(change("demo/s1.jsonl")), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_ticks_until_unregistered() {
        let hub = hub();
        let mut stream = hub.register();
        let id = stream.id();
        assert!(matches!(
            stream.next().await,
            Some(HubEvent::Connected { .. })
        ));

        let started = Instant::now();
        assert!(matches!(
            stream.next().await,
            Some(HubEvent::Heartbeat { .. })
        ));
        assert!(started.elapsed() >= Duration::from_secs(30));

        assert!(hub.unregister(id));
        tokio::time::sleep(Duration::from_secs(90)).await;
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_checks_registry_before_sending() {
        let hub = hub();
        let mut stream = hub.register();
        let id = stream.id();
        let _ = stream.next().await;

        // Remove the entry behind the heartbeat's back, keeping the queue open.
        let detached = hub.lock().remove(&id).expect("registered");
        tokio::time::sleep(Duration::from_secs(31)).await;

        assert!(stream.rx.try_recv().is_err());
        assert!(detached.heartbeat.is_finished());
        drop(detached);
    }

    #[tokio::test]
    async fn shutdown_ends_every_stream() {
        let hub = hub();
        let mut streams: Vec<EventStream> = (0..3).map(|_| hub.register()).collect();

        hub.shutdown();
        assert_eq!(hub.connection_count(), 0);
        for stream in &mut streams {
            assert!(matches!(
                stream.next().await,
                Some(HubEvent::Connected { .. })
            ));
            assert_eq!(stream.next().await, None);
        }
    }

    #[tokio::test]
    async fn register_after_shutdown_returns_ended_stream() {
        let hub = hub();
        hub.shutdown();

        let mut stream = hub.register();
        assert!(!hub.is_registered(stream.id()));
        assert_eq!(hub.connection_count(), 0);
        assert_eq!(stream.next().await, None);
        assert_eq!(hub.broadcast(change("demo/s1.jsonl")), 0);
    }
}
