//! Paper venue for development and tests.
//!
//! Simulates a venue in-process: acknowledges orders with sequential ids,
//! optionally fills them in full, and can be scripted to time out or refuse.
//! Execution reports arrive on a channel, as they would from a real venue's
//! stream.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

use keel_domain::{Fill, Order, Price};

use crate::error::{ExecError, ExecResult};
use crate::ports::{VenueFill, VenuePort};

/// Recover the data behind a poisoned lock; the venue's records stay usable
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
enum Scripted {
    Timeout,
    Reject(String),
}

// =============================================================================
// Paper Venue
// =============================================================================

/// In-process venue simulation.
///
/// By default every order is acknowledged immediately and stays open until
/// [`fill_order`](Self::fill_order) or a cancel. With
/// [`with_auto_fill`](Self::with_auto_fill) each acknowledged order is filled
/// in full at its limit price shortly after the acknowledgment.
pub struct PaperVenue {
    order_counter: AtomicU64,
    latency: Duration,
    auto_fill_fee_rate: Option<Decimal>,
    fill_delay: Duration,
    script: Mutex<VecDeque<Scripted>>,
    sent: Mutex<Vec<Order>>,
    cancelled: Mutex<Vec<String>>,
    open: Mutex<HashMap<String, Order>>,
    fills: mpsc::UnboundedSender<VenueFill>,
}

impl PaperVenue {
    /// Create a venue and the receiver its execution reports arrive on.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<VenueFill>) {
        let (fills, receiver) = mpsc::unbounded_channel();
        let venue = Self {
            order_counter: AtomicU64::new(0),
            latency: Duration::ZERO,
            auto_fill_fee_rate: None,
            fill_delay: Duration::from_millis(10),
            script: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
            open: Mutex::new(HashMap::new()),
            fills,
        };
        (venue, receiver)
    }

    /// Delay every venue call by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fill every acknowledged order in full, charging `fee_rate × notional`.
    ///
    /// The report is sent one fill delay (10ms unless
    /// [`with_fill_delay`](Self::with_fill_delay)) after the acknowledgment.
    pub fn with_auto_fill(mut self, fee_rate: Decimal) -> Self {
        self.auto_fill_fee_rate = Some(fee_rate);
        self
    }

    /// Delay between acknowledgment and automatic fill report
    pub fn with_fill_delay(mut self, delay: Duration) -> Self {
        self.fill_delay = delay;
        self
    }

    /// The next `count` sends report `ExecError::Timeout`
    pub fn script_timeouts(&self, count: usize) {
        let mut script = lock(&self.script);
        script.extend((0..count).map(|_| Scripted::Timeout));
    }

    /// The next send is refused with `reason`
    pub fn script_rejection(&self, reason: impl Into<String>) {
        lock(&self.script).push_back(Scripted::Reject(reason.into()));
    }

    /// Fill an open order in full at `price`.
    ///
    /// # Errors
    /// `ExecError::Venue` if `venue_order_id` is not open
    pub fn fill_order(&self, venue_order_id: &str, price: Price, fee: Decimal) -> ExecResult<()> {
        let order = lock(&self.open).remove(venue_order_id).ok_or_else(|| {
            ExecError::Venue(format!("No open order {}", venue_order_id))
        })?;

        let fill = build_fill(&order, price, fee)?;
        self.report(VenueFill { venue_order_id: venue_order_id.to_string(), fill });
        Ok(())
    }

    /// Every order received, including refused ones, in arrival order
    pub fn sent_orders(&self) -> Vec<Order> {
        lock(&self.sent).clone()
    }

    /// Venue ids of every cancel request
    pub fn cancelled(&self) -> Vec<String> {
        lock(&self.cancelled).clone()
    }

    /// Acknowledged orders not yet filled or cancelled
    pub fn open_order_count(&self) -> usize {
        lock(&self.open).len()
    }

    fn next_venue_order_id(&self) -> String {
        let n = self.order_counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("PAPER-{}", n)
    }

    fn report(&self, report: VenueFill) {
        send_report(&self.fills, report);
    }
}

fn send_report(fills: &mpsc::UnboundedSender<VenueFill>, report: VenueFill) {
    // Ignore send errors (receiver may have dropped)
    if fills.send(report).is_err() {
        debug!("Paper venue: fill receiver dropped");
    }
}

fn build_fill(order: &Order, price: Price, fee: Decimal) -> ExecResult<Fill> {
    let order_id = order
        .id
        .ok_or_else(|| ExecError::Venue("Order reached the venue without an id".to_string()))?;
    Ok(Fill::for_order(order_id, order, price, fee)?)
}

#[async_trait]
impl VenuePort for PaperVenue {
    async fn send_order(&self, order: &Order) -> ExecResult<String> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        lock(&self.sent).push(order.clone());

        let scripted = lock(&self.script).pop_front();
        match scripted {
            Some(Scripted::Timeout) => {
                return Err(ExecError::Timeout("Paper venue: simulated timeout".to_string()))
            },
            Some(Scripted::Reject(reason)) => return Err(ExecError::OrderRejected(reason)),
            None => {},
        }

        let venue_order_id = self.next_venue_order_id();
        debug!(%venue_order_id, symbol = %order.symbol, "Paper venue: order acknowledged");

        match self.auto_fill_fee_rate {
            Some(fee_rate) => {
                let fee = order.notional() * fee_rate;
                let fill = build_fill(order, order.price, fee)?;
                let report = VenueFill { venue_order_id: venue_order_id.clone(), fill };
                let sender = self.fills.clone();
                let delay = self.fill_delay;
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    send_report(&sender, report);
                });
            },
            None => {
                lock(&self.open).insert(venue_order_id.clone(), order.clone());
            },
        }

        Ok(venue_order_id)
    }

    async fn cancel_order(&self, venue_order_id: &str) -> ExecResult<bool> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        lock(&self.cancelled).push(venue_order_id.to_string());
        let removed = lock(&self.open).remove(venue_order_id).is_some();

        debug!(venue_order_id, removed, "Paper venue: cancel");
        Ok(removed)
    }
}

// =============================================================================
// Tests
// =============================================================================
