use std::collections::HashMap;

use relay_core::messages::Message;

/// Per-target mailboxes for one session. Owned by the orchestrator task.
///
/// `all` is never expanded here; callers enqueue one message per recipient.
#[derive(Debug, Default)]
pub struct MessageQueue {
    pending: HashMap<String, Vec<Message>>,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, message: Message) {
        self.pending.entry(message.to.clone()).or_default().push(message);
    }

    /// Pop and clear one agent's mailbox. Empty when nothing is pending.
    pub fn dequeue(&mut self, agent: &str) -> Vec<Message> {
        self.pending.remove(agent).unwrap_or_default()
    }

    /// Snapshot and clear every mailbox.
    pub fn dequeue_all(&mut self) -> HashMap<String, Vec<Message>> {
        std::mem::take(&mut self.pending)
    }

    pub fn is_empty(&self) -> bool {
        self.pending.values().all(Vec::is_empty)
    }

    /// Total pending messages across all targets.
    pub fn size(&self) -> usize {
        self.pending.values().map(Vec::len).sum()
    }

    /// Pending count per target, for diagnostics.
    pub fn counts(&self) -> HashMap<String, usize> {
        self.pending
            .iter()
            .filter(|(_, msgs)| !msgs.is_empty())
            .map(|(target, msgs)| (target.clone(), msgs.len()))
            .collect()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
