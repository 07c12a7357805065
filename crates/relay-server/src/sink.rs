use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use relay_core::events::{AgenticEvent, EventSink};

const FLUSH_INTERVAL: Duration = Duration::from_millis(100);
const MAX_QUEUED: usize = 200;
const POST_TIMEOUT: Duration = Duration::from_secs(5);

struct Shared {
    queue: Mutex<VecDeque<AgenticEvent>>,
    dropped: AtomicU64,
}

/// Forwards events to a remote dashboard's `/api/ingest` in small batches.
///
/// `publish` only appends to a bounded queue; a full queue drops the event
/// and counts it. Delivery failures are logged, never returned.
pub struct DashboardEventSink {
    shared: Arc<Shared>,
    stop: CancellationToken,
    flusher: Mutex<Option<JoinHandle<()>>>,
}

impl DashboardEventSink {
    /// Start forwarding to the dashboard at `base_url` (e.g. `http://127.0.0.1:7777`).
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(base_url: &str) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            dropped: AtomicU64::new(0),
        });
        let stop = CancellationToken::new();
        let endpoint = format!("{}/api/ingest", base_url.trim_end_matches('/'));
        let client = reqwest::Client::builder()
            .timeout(POST_TIMEOUT)
            .build()
            .unwrap_or_default();

        let flusher = tokio::spawn(flush_loop(
            Arc::clone(&shared),
            client,
            endpoint,
            stop.clone(),
        ));
        Self {
            shared,
            stop,
            flusher: Mutex::new(Some(flusher)),
        }
    }

    /// Events dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Flush what is queued and stop the background task.
    pub async fn close(&self) {
        self.stop.cancel();
        let flusher = self.flusher.lock().take();
        if let Some(flusher) = flusher {
            if let Err(e) = flusher.await {
                tracing::warn!(error = %e, "dashboard flusher ended abnormally");
            }
        }
        let dropped = self.dropped();
        if dropped > 0 {
            tracing::warn!(dropped, "dashboard sink dropped events");
        }
    }
}

impl EventSink for DashboardEventSink {
    fn publish(&self, event: &AgenticEvent) {
        if self.stop.is_cancelled() {
            return;
        }
        let mut queue = self.shared.queue.lock();
        if queue.len() >= MAX_QUEUED {
            self.shared.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        queue.push_back(event.clone());
    }
}

async fn flush_loop(
    shared: Arc<Shared>,
    client: reqwest::Client,
    endpoint: String,
    stop: CancellationToken,
) {
    let mut ticker = tokio::time::interval(FLUSH_INTERVAL);
    loop {
        let stopping = tokio::select! {
            _ = stop.cancelled() => true,
            _ = ticker.tick() => false,
        };
        let batch: Vec<AgenticEvent> = shared.queue.lock().drain(..).collect();
        if !batch.is_empty() {
            send_batch(&client, &endpoint, &batch).await;
        }
        if stopping {
            break;
        }
    }
}

async fn send_batch(client: &reqwest::Client, endpoint: &str, batch: &[AgenticEvent]) {
    match client.post(endpoint).json(batch).send().await {
        Ok(resp) if resp.status().is_success() => {
            tracing::trace!(count = batch.len(), "forwarded events to dashboard");
        }
        Ok(resp) => {
            tracing::warn!(status = resp.status().as_u16(), count = batch.len(), "dashboard rejected events");
        }
        Err(e) => {
            tracing::warn!(error = %e, count = batch.len(), "dashboard unreachable, events dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::routing::post;
    use axum::{Json, Router};
    use chrono::Utc;
    use relay_core::ids::SessionId;

    type Received = Arc<Mutex<Vec<usize>>>;

    async fn collector() -> (String, Received) {
        async fn ingest(
            State(received): State<Received>,
            Json(batch): Json<Vec<AgenticEvent>>,
        ) -> Json<serde_json::Value> {
            received.lock().push(batch.len());
            Json(serde_json::json!({ "accepted": batch.len() }))
        }

        let received: Received = Arc::default();
        let app = Router::new()
            .route("/api/ingest", post(ingest))
            .with_state(Arc::clone(&received));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        (format!("http://{addr}/"), received)
    }

    fn event(turn: u32) -> AgenticEvent {
        AgenticEvent::TurnComplete {
            session_id: SessionId::new(),
            turn,
            pending_count: 0,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn close_flushes_everything_queued() {
        let (url, received) = collector().await;
        let sink = DashboardEventSink::start(&url);
        for turn in 0..5 {
            sink.publish(&event(turn));
        }
        sink.close().await;
        assert_eq!(received.lock().iter().sum::<usize>(), 5);
        assert_eq!(sink.dropped(), 0);

        // Closed sinks ignore further events.
        sink.publish(&event(9));
        assert_eq!(sink.shared.queue.lock().len(), 0);
    }

    #[tokio::test]
    async fn full_queue_counts_overflow() {
        let (url, received) = collector().await;
        let sink = DashboardEventSink::start(&url);
        for turn in 0..250 {
            sink.publish(&event(turn));
        }
        assert_eq!(sink.dropped(), 50);
        sink.close().await;
        assert_eq!(received.lock().iter().sum::<usize>(), 200);
    }

    #[tokio::test]
    async fn unreachable_dashboard_is_not_an_error() {
        let sink = DashboardEventSink::start("http://127.0.0.1:9");
        sink.publish(&event(1));
        sink.close().await;
        assert_eq!(sink.dropped(), 0);
    }
}
