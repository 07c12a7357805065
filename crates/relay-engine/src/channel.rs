use std::collections::VecDeque;
use std::sync::Arc;

use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::Notify;

use relay_core::events::AgenticEvent;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("event channel supports only one consumer")]
    ConsumerAttached,
}

#[derive(Default)]
struct State {
    queue: VecDeque<AgenticEvent>,
    closed: bool,
    consuming: bool,
}

#[derive(Default)]
struct Shared {
    state: Mutex<State>,
    notify: Notify,
}

/// Ordered, unbounded bridge from the orchestrator to exactly one consumer.
///
/// Pushes after `close` are discarded.
#[derive(Clone, Default)]
pub struct EventChannel {
    shared: Arc<Shared>,
}

impl EventChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: AgenticEvent) {
        {
            let mut state = self.shared.state.lock();
            if state.closed {
                return;
            }
            state.queue.push_back(event);
        }
        self.shared.notify.notify_one();
    }

    pub fn close(&self) {
        self.shared.state.lock().closed = true;
        self.shared.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Attach the consumer. A second call fails.
    pub fn consumer(&self) -> Result<EventConsumer, ChannelError> {
        let mut state = self.shared.state.lock();
        if state.consuming {
            return Err(ChannelError::ConsumerAttached);
        }
        state.consuming = true;
        Ok(EventConsumer {
            shared: Arc::clone(&self.shared),
        })
    }
}

/// The single receiving side of an [`EventChannel`].
pub struct EventConsumer {
    shared: Arc<Shared>,
}

impl EventConsumer {
    /// Next event, or `None` once the channel is closed and drained.
    pub async fn next(&mut self) -> Option<AgenticEvent> {
        loop {
            {
                let mut state = self.shared.state.lock();
                if let Some(event) = state.queue.pop_front() {
                    return Some(event);
                }
                if state.closed {
                    return None;
                }
            }
            self.shared.notify.notified().await;
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = AgenticEvent> + Send {
        futures::stream::unfold(self, |mut consumer| async move {
            consumer.next().await.map(|event| (event, consumer))
        })
    }
}
