//! Event model for the dispatcher queue.
//!
//! Every event carries a sequence number assigned when it is built.
//! Sequence numbers are diagnostic only; processing order is queue order.

use crate::entities::{Fill, Order};
use crate::value_objects::{Price, Symbol};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

// =============================================================================
// Sequence Generator
// =============================================================================

/// Monotonic sequence source. Owned by whoever publishes events, never global.
#[derive(Debug)]
pub struct SequenceGenerator {
    last: AtomicU64,
}

impl SequenceGenerator {
    /// Create a generator whose first issued number is 1
    pub fn new() -> Self {
        Self { last: AtomicU64::new(0) }
    }

    /// Issue the next sequence number
    pub fn next(&self) -> u64 {
        self.last.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Last issued number (0 if none yet)
    pub fn last(&self) -> u64 {
        self.last.load(Ordering::Relaxed)
    }
}

impl Default for SequenceGenerator {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Payloads
// =============================================================================

/// Price update for one symbol
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketTick {
    /// Instrument
    pub symbol: Symbol,
    /// Observed price
    pub price: Price,
    /// When this price was observed
    pub timestamp: DateTime<Utc>,
}

impl MarketTick {
    /// Tick stamped now
    pub fn new(symbol: Symbol, price: Price) -> Self {
        Self { symbol, price, timestamp: Utc::now() }
    }
}

/// What an event carries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// Price update to route to strategies
    MarketData(MarketTick),
    /// Order to risk-check and submit
    Order(Order),
    /// Execution to apply to the portfolio
    Fill(Fill),
}

// =============================================================================
// Event
// =============================================================================

/// A sequenced event on the dispatcher queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Process-unique, monotonically increasing
    pub sequence: u64,
    /// When the event was built
    pub created_at: DateTime<Utc>,
    /// Tagged payload
    pub payload: EventPayload,
}

impl Event {
    /// Build an event, drawing its sequence number from `sequences`
    pub fn new(sequences: &SequenceGenerator, payload: EventPayload) -> Self {
        Self {
            sequence: sequences.next(),
            created_at: Utc::now(),
            payload,
        }
    }

    /// Tag name for logging
    pub fn kind(&self) -> &'static str {
        match self.payload {
            EventPayload::MarketData(_) => "market_data",
            EventPayload::Order(_) => "order",
            EventPayload::Fill(_) => "fill",
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn tick() -> EventPayload {
        EventPayload::MarketData(MarketTick::new(
            Symbol::new("AAPL").unwrap(),
            Price::new(dec!(190.5)).unwrap(),
        ))
    }

    #[test]
    fn test_sequence_starts_at_one_and_increases() {
        let seq = SequenceGenerator::new();
        assert_eq!(seq.last(), 0);

        let a = Event::new(&seq, tick());
        let b = Event::new(&seq, tick());

        assert_eq!(a.sequence, 1);
        assert_eq!(b.sequence, 2);
        assert_eq!(seq.last(), 2);
    }

    #[test]
    fn test_sequence_unique_across_threads() {
        let seq = Arc::new(SequenceGenerator::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let seq = seq.clone();
                std::thread::spawn(move || (0..250).map(|_| seq.next()).collect::<Vec<_>>())
            })
            .collect();

        let mut all: Vec<u64> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        all.sort_unstable();
        all.dedup();

        assert_eq!(all.len(), 1000);
        assert_eq!(all.first(), Some(&1));
        assert_eq!(all.last(), Some(&1000));
    }

    #[test]
    fn test_event_kind_tag() {
        let seq = SequenceGenerator::new();
        let event = Event::new(&seq, tick());
        assert_eq!(event.kind(), "market_data");

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["payload"]["type"], "market_data");
    }
}
