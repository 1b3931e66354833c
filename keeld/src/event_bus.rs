//! Event queue feeding the dispatcher.
//!
//! Any number of producers (market data feeds, strategies' embedders, the
//! lifecycle manager's fill callback) publish through cloned [`Publisher`]s.
//! Exactly one consumer, the dispatcher, drains the [`EventQueue`] in FIFO
//! order.
//!
//! Publishing only enqueues. It never touches engine state, so it never
//! waits on the dispatcher.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use keel_domain::{Event, EventPayload, Fill, MarketTick, Order, SequenceGenerator};
use tokio::sync::mpsc;

use crate::error::{DaemonError, DaemonResult};

/// Create a connected publisher / queue pair.
pub fn event_queue() -> (Publisher, EventQueue) {
    let (sender, receiver) = mpsc::unbounded_channel();
    let publisher = Publisher { sender, sequences: Arc::new(SequenceGenerator::new()) };
    (publisher, EventQueue { receiver })
}

// =============================================================================
// Publisher
// =============================================================================

/// Producer handle. Cheap to clone; all clones share one sequence counter.
#[derive(Debug, Clone)]
pub struct Publisher {
    sender: mpsc::UnboundedSender<Event>,
    sequences: Arc<SequenceGenerator>,
}

impl Publisher {
    /// Enqueue an event, returning its sequence number.
    ///
    /// # Errors
    /// `DaemonError::EventBus` once the queue's consumer is gone
    pub fn publish(&self, payload: EventPayload) -> DaemonResult<u64> {
        let event = Event::new(&self.sequences, payload);
        let sequence = event.sequence;

        self.sender
            .send(event)
            .map_err(|_| DaemonError::EventBus("Event queue closed".to_string()))?;

        Ok(sequence)
    }

    pub fn publish_market_data(&self, tick: MarketTick) -> DaemonResult<u64> {
        self.publish(EventPayload::MarketData(tick))
    }

    pub fn publish_order(&self, order: Order) -> DaemonResult<u64> {
        self.publish(EventPayload::Order(order))
    }

    pub fn publish_fill(&self, fill: Fill) -> DaemonResult<u64> {
        self.publish(EventPayload::Fill(fill))
    }

    /// Last sequence number issued by any clone of this publisher
    pub fn last_sequence(&self) -> u64 {
        self.sequences.last()
    }
}

// =============================================================================
// Event Queue
// =============================================================================

/// Consumer side of the queue.
#[derive(Debug)]
pub struct EventQueue {
    receiver: mpsc::UnboundedReceiver<Event>,
}

impl EventQueue {
    /// Wait for the next event. `None` once every publisher is dropped and
    /// the queue is drained.
    pub async fn recv(&mut self) -> Option<Event> {
        self.receiver.recv().await
    }

    /// Next event if one is queued right now
    pub fn try_recv(&mut self) -> Option<Event> {
        self.receiver.try_recv().ok()
    }
}

// =============================================================================
// Stop Handle
// =============================================================================

/// Clears the dispatcher's running flag. The loop notices on its next poll.
#[derive(Debug, Clone)]
pub struct StopHandle {
    running: Arc<AtomicBool>,
}

impl StopHandle {
    pub(crate) fn new(running: Arc<AtomicBool>) -> Self {
        Self { running }
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Tests
// =============================================================================
