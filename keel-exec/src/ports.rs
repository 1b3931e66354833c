//! Execution layer port definitions.
//!
//! The venue port is the only thing the lifecycle manager knows about the
//! outside world. Adapters implement it for a specific venue (paper, live).

use async_trait::async_trait;

use keel_domain::{Fill, Order};

use crate::error::ExecResult;

// =============================================================================
// Venue Port
// =============================================================================

/// Port for venue operations (sending and cancelling orders).
///
/// Both calls may suspend and may fail. The lifecycle manager bounds each
/// call with its own timeout, so implementations need not.
///
/// Implementations:
/// - `PaperVenue` - In-process simulation for development and tests
#[async_trait]
pub trait VenuePort: Send + Sync {
    /// Send an order. The order always carries its assigned id.
    ///
    /// # Returns
    ///
    /// The venue-assigned order id on acknowledgment.
    ///
    /// # Errors
    ///
    /// `ExecError::Timeout` for transient failures worth retrying; any other
    /// variant is treated as a definitive refusal.
    async fn send_order(&self, order: &Order) -> ExecResult<String>;

    /// Cancel an acknowledged order.
    ///
    /// # Returns
    ///
    /// `true` if the venue cancelled it, `false` if it refused (already
    /// filled, unknown, ...).
    async fn cancel_order(&self, venue_order_id: &str) -> ExecResult<bool>;
}

/// An execution report from a venue, keyed by the venue's order id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VenueFill {
    /// Id the venue returned from `send_order`
    pub venue_order_id: String,
    /// The execution
    pub fill: Fill,
}
