//! Engine counters.
//!
//! Counters live in a registry owned by the dispatcher, not in a process
//! global, so several engines (or tests) never share counts.

use prometheus::{Encoder, IntCounter, Registry, TextEncoder};

use crate::error::DaemonResult;

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub events_processed: u64,
    pub orders_submitted: u64,
    pub orders_rejected: u64,
}

/// Monotonic counters for the dispatcher. Never reset.
pub struct EngineStats {
    registry: Registry,
    events_processed: IntCounter,
    orders_submitted: IntCounter,
    orders_rejected: IntCounter,
}

impl EngineStats {
    pub fn new() -> DaemonResult<Self> {
        let registry = Registry::new();

        let events_processed =
            IntCounter::new("keel_events_processed_total", "events handled by the dispatcher")?;
        let orders_submitted =
            IntCounter::new("keel_orders_submitted_total", "orders passed to the lifecycle manager")?;
        let orders_rejected =
            IntCounter::new("keel_orders_rejected_total", "orders rejected by risk")?;

        registry.register(Box::new(events_processed.clone()))?;
        registry.register(Box::new(orders_submitted.clone()))?;
        registry.register(Box::new(orders_rejected.clone()))?;

        Ok(Self { registry, events_processed, orders_submitted, orders_rejected })
    }

    pub fn record_event(&self) {
        self.events_processed.inc();
    }

    pub fn record_submitted(&self) {
        self.orders_submitted.inc();
    }

    pub fn record_rejected(&self) {
        self.orders_rejected.inc();
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            events_processed: self.events_processed.get(),
            orders_submitted: self.orders_submitted.get(),
            orders_rejected: self.orders_rejected.get(),
        }
    }

    /// Prometheus text exposition of every counter
    pub fn render(&self) -> DaemonResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

// =============================================================================
// Tests
// =============================================================================
