//! Dispatcher: the single event loop.
//!
//! Every state change in the engine happens here, one event at a time, in
//! queue order:
//!
//! ```text
//! MarketData → strategy → orders ─┐
//! Order ───────────────────────────┴→ RiskEngine ─approved→ OrderLifecycleManager
//!                                         └─rejected→ strategy.on_order_rejected
//! Fill → Portfolio → strategy.on_fill
//! ```
//!
//! On market data, each matching strategy's orders are routed as soon as
//! that strategy returns, before the next strategy sees the tick.
//!
//! Venue fills come back through the lifecycle manager's fill callback,
//! which publishes them as `Fill` events, so the portfolio sees fills in
//! queue order rather than in venue completion order.
//!
//! A failing or panicking handler is logged and the loop moves on to the
//! next event.

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use keel_domain::{Event, EventPayload, Fill, MarketTick, Order};
use keel_engine::{Portfolio, RiskEngine};
use keel_exec::{OrderLifecycleManager, VenuePort};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{DaemonError, DaemonResult};
use crate::event_bus::{event_queue, EventQueue, Publisher, StopHandle};
use crate::stats::EngineStats;
use crate::strategy::Strategy;

// =============================================================================
// Dispatcher
// =============================================================================

/// Owns the portfolio, risk engine and strategies, and drives the lifecycle
/// manager.
pub struct Dispatcher<V: VenuePort + 'static> {
    queue: EventQueue,
    publisher: Publisher,
    strategies: BTreeMap<String, Box<dyn Strategy>>,
    portfolio: Portfolio,
    risk: RiskEngine,
    lifecycle: OrderLifecycleManager<V>,
    stats: EngineStats,
    running: Arc<AtomicBool>,
    poll_interval: Duration,
}

impl<V: VenuePort + 'static> Dispatcher<V> {
    /// Build a dispatcher trading against `venue`.
    ///
    /// Wires the lifecycle manager's fill callback to this dispatcher's queue.
    pub fn new(config: &Config, venue: Arc<V>) -> DaemonResult<Self> {
        let (publisher, queue) = event_queue();
        let lifecycle = OrderLifecycleManager::new(venue, config.execution);

        let fill_publisher = publisher.clone();
        lifecycle.set_fill_callback(Arc::new(move |fill: Fill| {
            let order_id = fill.order_id();
            if let Err(e) = fill_publisher.publish_fill(fill) {
                error!(%order_id, error = %e, "Failed to enqueue fill");
            }
        }))?;

        Ok(Self {
            queue,
            publisher,
            strategies: BTreeMap::new(),
            portfolio: Portfolio::new(config.starting_cash),
            risk: RiskEngine::new(config.risk),
            lifecycle,
            stats: EngineStats::new()?,
            running: Arc::new(AtomicBool::new(true)),
            poll_interval: config.dispatcher.poll_interval(),
        })
    }

    /// Add a strategy, keyed by its name.
    ///
    /// # Errors
    /// `DaemonError::DuplicateStrategy` if the name is taken
    pub fn register_strategy(&mut self, strategy: Box<dyn Strategy>) -> DaemonResult<()> {
        let name = strategy.name().to_string();
        if self.strategies.contains_key(&name) {
            return Err(DaemonError::DuplicateStrategy(name));
        }

        info!(strategy = %name, symbol = %strategy.symbol(), "Strategy registered");
        self.strategies.insert(name, strategy);
        Ok(())
    }

    /// Take the current equity as the day's baseline, clear the kill switch
    /// and drop the previous session's terminal orders.
    pub fn mark_start_of_day(&mut self) -> DaemonResult<()> {
        let equity = self.portfolio.total_equity();
        self.risk.mark_start_of_day(equity);
        let purged = self.lifecycle.purge_terminal()?;
        info!(%equity, purged, "Start of day marked");
        Ok(())
    }

    /// A producer handle for this dispatcher's queue
    pub fn publisher(&self) -> Publisher {
        self.publisher.clone()
    }

    /// Handle that stops [`run`](Self::run)
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle::new(Arc::clone(&self.running))
    }

    /// Process events until stopped.
    ///
    /// Waits at most one poll interval for each event, so a stop request is
    /// noticed even when the queue is idle.
    pub async fn run(&mut self) -> DaemonResult<()> {
        info!(
            strategies = self.strategies.len(),
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Dispatcher running"
        );

        while self.running.load(Ordering::SeqCst) {
            match tokio::time::timeout(self.poll_interval, self.queue.recv()).await {
                Ok(Some(event)) => self.dispatch(event),
                Ok(None) => {
                    info!("Event queue closed");
                    break;
                },
                Err(_) => {}, // empty poll
            }
        }

        let stats = self.stats.snapshot();
        info!(
            events_processed = stats.events_processed,
            orders_submitted = stats.orders_submitted,
            orders_rejected = stats.orders_rejected,
            "Dispatcher stopped"
        );
        Ok(())
    }

    /// Handle every event queued right now, without waiting.
    ///
    /// Returns how many events were handled.
    pub fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Some(event) = self.queue.try_recv() {
            self.dispatch(event);
            handled += 1;
        }
        handled
    }

    pub fn portfolio(&self) -> &Portfolio {
        &self.portfolio
    }

    pub fn risk(&self) -> &RiskEngine {
        &self.risk
    }

    pub fn lifecycle(&self) -> &OrderLifecycleManager<V> {
        &self.lifecycle
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    pub fn strategy_count(&self) -> usize {
        self.strategies.len()
    }

    // =========================================================================
    // Event handling
    // =========================================================================

    /// Handle one event in isolation. Failures and panics stop here.
    fn dispatch(&mut self, event: Event) {
        let sequence = event.sequence;
        let kind = event.kind();
        debug!(sequence, kind, "Dispatching event");

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.handle_event(event)));
        let result = match outcome {
            Ok(result) => result,
            Err(payload) => Err(DaemonError::HandlerPanic(panic_message(payload))),
        };

        if let Err(e) = result {
            error!(sequence, kind, error = %e, "Error handling event");
        }

        self.stats.record_event();
    }

    fn handle_event(&mut self, event: Event) -> DaemonResult<()> {
        match event.payload {
            EventPayload::MarketData(tick) => {
                self.handle_market_data(&tick);
                Ok(())
            },
            EventPayload::Order(order) => self.route_order(order),
            EventPayload::Fill(fill) => self.handle_fill(&fill),
        }
    }

    /// Each strategy is isolated: a panic, or a failed submission, only
    /// loses that strategy's remaining work for this tick.
    fn handle_market_data(&mut self, tick: &MarketTick) {
        let names: Vec<String> = self
            .strategies
            .iter()
            .filter(|(_, s)| s.symbol() == &tick.symbol)
            .map(|(name, _)| name.clone())
            .collect();

        if names.is_empty() {
            debug!(symbol = %tick.symbol, price = %tick.price, "No strategy for market data");
            return;
        }

        for name in names {
            let Some(strategy) = self.strategies.get_mut(&name) else {
                continue;
            };

            let outcome = panic::catch_unwind(AssertUnwindSafe(|| strategy.on_market_data(tick)));
            let orders = match outcome {
                Ok(orders) => orders,
                Err(payload) => {
                    let e = DaemonError::HandlerPanic(panic_message(payload));
                    error!(
                        strategy = %name,
                        symbol = %tick.symbol,
                        error = %e,
                        "Strategy failed on market data"
                    );
                    continue;
                },
            };

            if orders.is_empty() {
                debug!(strategy = %name, symbol = %tick.symbol, "No orders from market data");
                continue;
            }

            for order in orders {
                if let Err(e) = self.route_order(order) {
                    error!(strategy = %name, error = %e, "Failed to route order");
                }
            }
        }
    }

    /// Risk check, then submission. Risk rejections go back to the strategy
    /// and are never retried.
    fn route_order(&mut self, order: Order) -> DaemonResult<()> {
        let decision = self.risk.check(&order, &self.portfolio);

        if let Some(reason) = decision.reason() {
            self.stats.record_rejected();
            match self.strategies.get_mut(&order.strategy_name) {
                Some(strategy) => strategy.on_order_rejected(&order, reason),
                None => warn!(
                    strategy = %order.strategy_name,
                    reason,
                    "Rejected order has no registered strategy"
                ),
            }
            return Ok(());
        }

        let order_id = self.lifecycle.submit(order)?;
        self.stats.record_submitted();
        debug!(%order_id, "Order handed to lifecycle manager");
        Ok(())
    }

    fn handle_fill(&mut self, fill: &Fill) -> DaemonResult<()> {
        let realized = self.portfolio.on_fill(fill)?;
        info!(
            order_id = %fill.order_id(),
            symbol = %fill.symbol(),
            side = %fill.side(),
            quantity = %fill.quantity(),
            price = %fill.price(),
            %realized,
            cash = %self.portfolio.cash(),
            "Fill applied"
        );

        match self.strategies.get_mut(fill.strategy_name()) {
            Some(strategy) => strategy.on_fill(fill),
            None => warn!(strategy = %fill.strategy_name(), "Fill has no registered strategy"),
        }
        Ok(())
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// =============================================================================
// Tests
// =============================================================================
