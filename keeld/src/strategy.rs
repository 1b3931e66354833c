//! Strategy capability.
//!
//! Strategies turn price updates into orders. The dispatcher owns them and
//! calls them from its single loop, so they need no interior locking.

use keel_domain::{Fill, MarketTick, Order, Symbol};

/// A trading strategy bound to one symbol.
///
/// Implementations are synchronous; anything slow belongs outside the
/// dispatcher loop.
pub trait Strategy: Send {
    /// Unique name. Orders carry it as `strategy_name` so fills and
    /// rejections find their way back.
    fn name(&self) -> &str;

    /// Symbol whose market data this strategy receives
    fn symbol(&self) -> &Symbol;

    /// React to a price update with zero or more orders, in the order they
    /// should be submitted
    fn on_market_data(&mut self, tick: &MarketTick) -> Vec<Order>;

    /// An order of this strategy executed
    fn on_fill(&mut self, fill: &Fill);

    /// An order of this strategy was refused by risk. Not called for venue
    /// rejections.
    fn on_order_rejected(&mut self, order: &Order, reason: &str);
}
