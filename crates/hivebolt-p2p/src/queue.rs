use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::Notify;
use tracing::warn;

use hivebolt_core::block::Block;
use hivebolt_core::transaction::Transaction;

/// A validated inbound item handed from a session task to the chain writer.
#[derive(Clone, Debug)]
pub enum PeerEvent {
    Transaction(Transaction),
    Block(Block),
    PeerList(Vec<String>),
}

impl PeerEvent {
    fn is_block(&self) -> bool {
        matches!(self, PeerEvent::Block(_))
    }
}

/// Bounded queue between the I/O sessions and the single chain writer.
///
/// Backpressure policy: when full, the oldest non-block item is dropped to
/// make room; blocks are never dropped — if the queue is all blocks it grows
/// past capacity, loudly.
#[derive(Debug)]
pub struct InboundQueue {
    items: Mutex<VecDeque<PeerEvent>>,
    notify: Notify,
    capacity: usize,
}

impl InboundQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            notify: Notify::new(),
            capacity: capacity.max(1),
        }
    }

    /// Enqueue an event, applying the drop policy when at capacity.
    pub fn push(&self, event: PeerEvent) {
        {
            let mut items = self.items.lock().expect("inbound queue mutex poisoned");
            if items.len() >= self.capacity {
                if let Some(pos) = items.iter().position(|e| !e.is_block()) {
                    items.remove(pos);
                    warn!("inbound queue full; dropped oldest non-block message");
                } else if !event.is_block() {
                    warn!("inbound queue full of blocks; dropped incoming non-block message");
                    return;
                } else {
                    warn!(
                        len = items.len(),
                        "inbound queue full of blocks; growing past capacity"
                    );
                }
            }
            items.push_back(event);
        }
        self.notify.notify_one();
    }

    /// Wait for the next event.
    pub async fn pop(&self) -> PeerEvent {
        loop {
            {
                let mut items = self.items.lock().expect("inbound queue mutex poisoned");
                if let Some(event) = items.pop_front() {
                    return event;
                }
            }
            self.notify.notified().await;
        }
    }

    pub fn len(&self) -> usize {
        self.items.lock().expect("inbound queue mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
