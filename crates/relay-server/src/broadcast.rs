use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use futures::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use relay_core::events::{AgenticEvent, EventSink};
use relay_core::ids::{ClientId, SessionId};

pub const CONNECTED_FRAME: &str = ": connected\n\n";
pub const HEARTBEAT_FRAME: &str = ": heartbeat\n\n";

/// Encode one event as a server-sent-events frame.
pub fn sse_frame(event: &AgenticEvent) -> Option<String> {
    match serde_json::to_string(event) {
        Ok(json) => Some(format!("event: {}\ndata: {json}\n\n", event.event_type())),
        Err(e) => {
            tracing::warn!(error = %e, event_type = event.event_type(), "failed to encode event");
            None
        }
    }
}

/// A connected SSE client.
struct Client {
    /// `None` receives every session.
    filter: Option<SessionId>,
    tx: mpsc::Sender<String>,
}

impl Client {
    fn wants(&self, session_id: &SessionId) -> bool {
        self.filter.as_ref().map_or(true, |f| f == session_id)
    }
}

/// Fan-out of live events to web clients. Best effort: a client that
/// cannot take a frame is dropped, never retried.
pub struct SseBroadcaster {
    clients: DashMap<ClientId, Client>,
    max_send_queue: usize,
}

impl SseBroadcaster {
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            clients: DashMap::new(),
            max_send_queue,
        }
    }

    /// Register a client and return its id and frame receiver.
    pub fn register(&self, filter: Option<SessionId>) -> (ClientId, mpsc::Receiver<String>) {
        let id = ClientId::new();
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        self.clients.insert(id.clone(), Client { filter, tx });
        tracing::debug!(client_id = %id, "SSE client registered");
        (id, rx)
    }

    pub fn unregister(&self, id: &ClientId) {
        if self.clients.remove(id).is_some() {
            tracing::debug!(client_id = %id, "SSE client removed");
        }
    }

    /// Write `event` to every matching client. Returns how many received it.
    pub fn broadcast(&self, event: &AgenticEvent) -> usize {
        let Some(frame) = sse_frame(event) else {
            return 0;
        };
        let session_id = event.session_id();
        let mut delivered = 0;
        let mut failed = Vec::new();
        for entry in self.clients.iter() {
            if !entry.value().wants(session_id) {
                continue;
            }
            match entry.value().tx.try_send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(_) => failed.push(entry.key().clone()),
            }
        }
        for id in failed {
            tracing::info!(client_id = %id, "dropping SSE client after failed write");
            self.clients.remove(&id);
        }
        delivered
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Register a client and return its frame stream: `: connected`, then
    /// events interleaved with periodic heartbeats until `shutdown` fires.
    /// Dropping the stream unregisters the client.
    pub fn subscribe(
        self: &Arc<Self>,
        filter: Option<SessionId>,
        heartbeat: Duration,
        shutdown: CancellationToken,
    ) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
        let (id, rx) = self.register(filter);
        let subscription = Subscription {
            id,
            broadcaster: Arc::clone(self),
            rx,
        };
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + heartbeat, heartbeat);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        futures::stream::unfold(
            (subscription, ticker, shutdown, false),
            |(mut sub, mut ticker, shutdown, connected)| async move {
                if !connected {
                    let frame = Bytes::from_static(CONNECTED_FRAME.as_bytes());
                    return Some((Ok(frame), (sub, ticker, shutdown, true)));
                }
                let frame = tokio::select! {
                    _ = shutdown.cancelled() => return None,
                    frame = sub.rx.recv() => Bytes::from(frame?),
                    _ = ticker.tick() => Bytes::from_static(HEARTBEAT_FRAME.as_bytes()),
                };
                Some((Ok(frame), (sub, ticker, shutdown, true)))
            },
        )
    }
}

impl EventSink for SseBroadcaster {
    fn publish(&self, event: &AgenticEvent) {
        self.broadcast(event);
    }
}

struct Subscription {
    id: ClientId,
    broadcaster: Arc<SseBroadcaster>,
    rx: mpsc::Receiver<String>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.broadcaster.unregister(&self.id);
    }
}
