//! Pre-trade risk engine.
//!
//! Every outbound order passes through [`RiskEngine::check`]. Checks run in a
//! fixed order and stop at the first failure:
//!
//! ```text
//! kill switch → rate window → order notional → projected position
//!             → daily loss → drawdown (latches the kill switch)
//! ```
//!
//! Only an approved order is recorded in the rate window.

use crate::error::{EngineError, EngineResult};
use crate::portfolio::Portfolio;
use chrono::{DateTime, Duration, Utc};
use keel_domain::Order;
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::fmt;
use tracing::{error, warn};

/// Length of the order rate window
const RATE_WINDOW_SECS: i64 = 60;

// =============================================================================
// RiskLimits
// =============================================================================

/// Immutable risk configuration.
///
/// # Example
///
/// ```
/// # use keel_engine::RiskLimits;
/// # use rust_decimal_macros::dec;
/// let limits = RiskLimits::new(dec!(50000), dec!(10000), dec!(5000), 60, dec!(0.05)).unwrap();
/// assert_eq!(limits.max_orders_per_minute(), 60);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RiskLimits {
    max_position_notional: Decimal,
    max_order_notional: Decimal,
    max_daily_loss: Decimal,
    max_orders_per_minute: u32,
    /// Fraction of start-of-day equity, e.g. 0.05 = 5%
    kill_switch_drawdown_pct: Decimal,
}

impl RiskLimits {
    /// Create validated limits
    ///
    /// # Errors
    /// Returns `EngineError::InvalidLimits` if:
    /// - Any notional or loss limit <= 0
    /// - `max_orders_per_minute` is 0
    /// - Drawdown fraction is not in (0, 1]
    pub fn new(
        max_position_notional: Decimal,
        max_order_notional: Decimal,
        max_daily_loss: Decimal,
        max_orders_per_minute: u32,
        kill_switch_drawdown_pct: Decimal,
    ) -> EngineResult<Self> {
        if max_position_notional <= Decimal::ZERO {
            return Err(EngineError::InvalidLimits(
                "max_position_notional must be positive".to_string(),
            ));
        }

        if max_order_notional <= Decimal::ZERO {
            return Err(EngineError::InvalidLimits(
                "max_order_notional must be positive".to_string(),
            ));
        }

        if max_daily_loss <= Decimal::ZERO {
            return Err(EngineError::InvalidLimits("max_daily_loss must be positive".to_string()));
        }

        if max_orders_per_minute == 0 {
            return Err(EngineError::InvalidLimits(
                "max_orders_per_minute must be at least 1".to_string(),
            ));
        }

        if kill_switch_drawdown_pct <= Decimal::ZERO || kill_switch_drawdown_pct > Decimal::ONE {
            return Err(EngineError::InvalidLimits(format!(
                "kill_switch_drawdown_pct must be in (0, 1], got {}",
                kill_switch_drawdown_pct
            )));
        }

        Ok(Self {
            max_position_notional,
            max_order_notional,
            max_daily_loss,
            max_orders_per_minute,
            kill_switch_drawdown_pct,
        })
    }

    pub fn max_position_notional(&self) -> Decimal {
        self.max_position_notional
    }

    pub fn max_order_notional(&self) -> Decimal {
        self.max_order_notional
    }

    pub fn max_daily_loss(&self) -> Decimal {
        self.max_daily_loss
    }

    pub fn max_orders_per_minute(&self) -> u32 {
        self.max_orders_per_minute
    }

    pub fn kill_switch_drawdown_pct(&self) -> Decimal {
        self.kill_switch_drawdown_pct
    }
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_position_notional: Decimal::from(50_000),
            max_order_notional: Decimal::from(10_000),
            max_daily_loss: Decimal::from(5_000),
            max_orders_per_minute: 60,
            kill_switch_drawdown_pct: Decimal::new(5, 2), // 5%
        }
    }
}

impl fmt::Display for RiskLimits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RiskLimits(position≤{}, order≤{}, daily_loss≤{}, {}/min, drawdown<{})",
            self.max_position_notional,
            self.max_order_notional,
            self.max_daily_loss,
            self.max_orders_per_minute,
            self.kill_switch_drawdown_pct
        )
    }
}

// =============================================================================
// RiskDecision
// =============================================================================

/// Outcome of a risk check. A reason is present iff the order was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiskDecision {
    approved: bool,
    reason: Option<String>,
}

impl RiskDecision {
    pub fn approve() -> Self {
        Self { approved: true, reason: None }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Self { approved: false, reason: Some(reason.into()) }
    }

    pub fn is_approved(&self) -> bool {
        self.approved
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }
}

// =============================================================================
// RiskEngine
// =============================================================================

/// Admission control for outbound orders.
///
/// Owned by the dispatcher and only touched from its loop, so it carries no
/// locks.
#[derive(Debug)]
pub struct RiskEngine {
    limits: RiskLimits,
    order_times: VecDeque<DateTime<Utc>>,
    start_of_day_equity: Option<Decimal>,
    kill_switch: bool,
}

impl RiskEngine {
    pub fn new(limits: RiskLimits) -> Self {
        Self {
            limits,
            order_times: VecDeque::new(),
            start_of_day_equity: None,
            kill_switch: false,
        }
    }

    /// Record the session's equity baseline and clear the kill switch
    pub fn mark_start_of_day(&mut self, equity: Decimal) {
        self.start_of_day_equity = Some(equity);
        self.kill_switch = false;
    }

    /// Check `order` against current portfolio state, stamped now
    pub fn check(&mut self, order: &Order, portfolio: &Portfolio) -> RiskDecision {
        self.check_at(order, portfolio, Utc::now())
    }

    /// Check `order` as of `now`
    pub fn check_at(
        &mut self,
        order: &Order,
        portfolio: &Portfolio,
        now: DateTime<Utc>,
    ) -> RiskDecision {
        let decision = self.evaluate(order, portfolio, now);

        match decision.reason() {
            None => self.order_times.push_back(now),
            Some(reason) => warn!(
                symbol = %order.symbol,
                side = %order.side,
                strategy = %order.strategy_name,
                reason,
                "Order rejected by risk"
            ),
        }

        decision
    }

    fn evaluate(&mut self, order: &Order, portfolio: &Portfolio, now: DateTime<Utc>) -> RiskDecision {
        if self.kill_switch {
            return RiskDecision::reject("kill switch active");
        }

        self.prune_window(now);
        if self.order_times.len() >= self.limits.max_orders_per_minute as usize {
            return RiskDecision::reject("order rate limit exceeded");
        }

        let price = order.price.as_decimal();
        if order.notional() > self.limits.max_order_notional {
            return RiskDecision::reject("order notional exceeds max_order_notional");
        }

        let projected = portfolio.position_quantity(&order.symbol) + order.signed_quantity();
        if projected.abs() * price > self.limits.max_position_notional {
            return RiskDecision::reject("projected position exceeds max_position_notional");
        }

        if let Some(baseline) = self.start_of_day_equity {
            let pnl = portfolio.daily_pnl(baseline);
            if pnl < -self.limits.max_daily_loss {
                return RiskDecision::reject("daily loss limit breached");
            }

            if baseline > Decimal::ZERO {
                let drawdown =
                    if pnl < Decimal::ZERO { -pnl / baseline } else { Decimal::ZERO };
                if drawdown >= self.limits.kill_switch_drawdown_pct {
                    self.kill_switch = true;
                    error!(
                        baseline = %baseline,
                        daily_pnl = %pnl,
                        drawdown = %drawdown,
                        threshold = %self.limits.kill_switch_drawdown_pct,
                        "Kill switch latched"
                    );
                    return RiskDecision::reject(
                        "kill switch triggered: drawdown threshold breached",
                    );
                }
            }
        }

        RiskDecision::approve()
    }

    /// Drop window entries strictly older than 60 seconds
    fn prune_window(&mut self, now: DateTime<Utc>) {
        let cutoff = now - Duration::seconds(RATE_WINDOW_SECS);
        while self.order_times.front().is_some_and(|t| *t < cutoff) {
            self.order_times.pop_front();
        }
    }

    pub fn is_kill_switch_active(&self) -> bool {
        self.kill_switch
    }

    pub fn start_of_day_equity(&self) -> Option<Decimal> {
        self.start_of_day_equity
    }

    /// Approved orders currently held in the rate window
    pub fn orders_in_window(&self) -> usize {
        self.order_times.len()
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use keel_domain::{new_order_id, Fill, OrderSide, Price, Quantity, Symbol};
    use rust_decimal_macros::dec;

    fn limits() -> RiskLimits {
        RiskLimits::new(dec!(10000), dec!(10000), dec!(5000), 100, dec!(0.05)).unwrap()
    }

    fn order(side: OrderSide, qty: Decimal, px: Decimal) -> Order {
        Order::new(
            Symbol::new("AAPL").unwrap(),
            side,
            Quantity::new(qty).unwrap(),
            Price::new(px).unwrap(),
            "test",
        )
    }

    fn apply(portfolio: &mut Portfolio, side: OrderSide, qty: Decimal, px: Decimal) {
        let o = order(side, qty, px);
        let fill = Fill::for_order(new_order_id(), &o, o.price, Decimal::ZERO).unwrap();
        portfolio.on_fill(&fill).unwrap();
    }

    // RiskLimits tests
    #[test]
    fn test_limits_validation() {
        assert!(RiskLimits::new(dec!(0), dec!(1), dec!(1), 1, dec!(0.1)).is_err());
        assert!(RiskLimits::new(dec!(1), dec!(-1), dec!(1), 1, dec!(0.1)).is_err());
        assert!(RiskLimits::new(dec!(1), dec!(1), dec!(0), 1, dec!(0.1)).is_err());
        assert!(RiskLimits::new(dec!(1), dec!(1), dec!(1), 0, dec!(0.1)).is_err());
        assert!(RiskLimits::new(dec!(1), dec!(1), dec!(1), 1, dec!(0)).is_err());
        assert!(RiskLimits::new(dec!(1), dec!(1), dec!(1), 1, dec!(1.5)).is_err());
        assert!(RiskLimits::new(dec!(1), dec!(1), dec!(1), 1, dec!(1)).is_ok());
    }

    #[test]
    fn test_decision_reason_iff_rejected() {
        let ok = RiskDecision::approve();
        assert!(ok.is_approved());
        assert!(ok.reason().is_none());

        let no = RiskDecision::reject("nope");
        assert!(!no.is_approved());
        assert_eq!(no.reason(), Some("nope"));
    }

    // Rate window tests
    #[test]
    fn test_rate_limit_three_orders_in_one_second() {
        let limits = RiskLimits::new(dec!(100000), dec!(10000), dec!(5000), 2, dec!(0.05)).unwrap();
        let mut risk = RiskEngine::new(limits);
        let portfolio = Portfolio::new(dec!(100000));
        let t0 = Utc::now();
        let o = order(OrderSide::Buy, dec!(1), dec!(10));

        assert!(risk.check_at(&o, &portfolio, t0).is_approved());
        assert!(risk.check_at(&o, &portfolio, t0 + Duration::milliseconds(300)).is_approved());

        let third = risk.check_at(&o, &portfolio, t0 + Duration::milliseconds(600));
        assert_eq!(third.reason(), Some("order rate limit exceeded"));
        assert_eq!(risk.orders_in_window(), 2);
    }

    #[test]
    fn test_rate_window_expires_old_entries() {
        let limits = RiskLimits::new(dec!(100000), dec!(10000), dec!(5000), 1, dec!(0.05)).unwrap();
        let mut risk = RiskEngine::new(limits);
        let portfolio = Portfolio::new(dec!(100000));
        let t0 = Utc::now();
        let o = order(OrderSide::Buy, dec!(1), dec!(10));

        assert!(risk.check_at(&o, &portfolio, t0).is_approved());
        // Exactly 60s old still counts
        assert!(!risk.check_at(&o, &portfolio, t0 + Duration::seconds(60)).is_approved());
        assert!(risk
            .check_at(&o, &portfolio, t0 + Duration::seconds(60) + Duration::milliseconds(1))
            .is_approved());
    }

    #[test]
    fn test_rejected_orders_not_recorded() {
        let mut risk = RiskEngine::new(limits());
        let portfolio = Portfolio::new(dec!(100000));
        let big = order(OrderSide::Buy, dec!(1000), dec!(100));

        assert!(!risk.check(&big, &portfolio).is_approved());
        assert_eq!(risk.orders_in_window(), 0);
    }

    // Notional tests
    #[test]
    fn test_order_notional_cap() {
        let mut risk = RiskEngine::new(limits());
        let portfolio = Portfolio::new(dec!(100000));

        let at_cap = order(OrderSide::Buy, dec!(100), dec!(100));
        assert!(risk.check(&at_cap, &portfolio).is_approved());

        let over = order(OrderSide::Buy, dec!(100.01), dec!(100));
        assert_eq!(
            risk.check(&over, &portfolio).reason(),
            Some("order notional exceeds max_order_notional")
        );
    }

    #[test]
    fn test_projected_position_cap() {
        let limits = RiskLimits::new(dec!(10000), dec!(100000), dec!(5000), 100, dec!(0.05)).unwrap();
        let mut risk = RiskEngine::new(limits);
        let mut portfolio = Portfolio::new(dec!(100000));
        apply(&mut portfolio, OrderSide::Buy, dec!(50), dec!(100));

        let decision = risk.check(&order(OrderSide::Buy, dec!(60), dec!(100)), &portfolio);
        assert_eq!(decision.reason(), Some("projected position exceeds max_position_notional"));

        // Reducing the same position is fine
        let decision = risk.check(&order(OrderSide::Sell, dec!(60), dec!(100)), &portfolio);
        assert!(decision.is_approved());
    }

    // Loss tests
    #[test]
    fn test_daily_loss_limit() {
        let limits = RiskLimits::new(dec!(1000000), dec!(1000000), dec!(1000), 100, dec!(0.5)).unwrap();
        let mut risk = RiskEngine::new(limits);
        let mut portfolio = Portfolio::new(dec!(100000));
        risk.mark_start_of_day(portfolio.total_equity());

        apply(&mut portfolio, OrderSide::Buy, dec!(100), dec!(100));
        apply(&mut portfolio, OrderSide::Buy, dec!(1), dec!(80)); // marks 101 @ 80
        assert_eq!(portfolio.daily_pnl(dec!(100000)), dec!(-2000));

        let decision = risk.check(&order(OrderSide::Sell, dec!(1), dec!(80)), &portfolio);
        assert_eq!(decision.reason(), Some("daily loss limit breached"));
        assert!(!risk.is_kill_switch_active());
    }

    #[test]
    fn test_loss_checks_skipped_without_baseline() {
        let mut risk = RiskEngine::new(limits());
        let mut portfolio = Portfolio::new(dec!(100000));
        apply(&mut portfolio, OrderSide::Buy, dec!(100), dec!(100));
        apply(&mut portfolio, OrderSide::Buy, dec!(1), dec!(40));

        assert!(risk.start_of_day_equity().is_none());
        assert!(risk.check(&order(OrderSide::Sell, dec!(1), dec!(40)), &portfolio).is_approved());
    }

    #[test]
    fn test_kill_switch_latches_until_reset() {
        let limits = RiskLimits::new(dec!(1000000), dec!(1000000), dec!(10000), 100, dec!(0.05)).unwrap();
        let mut risk = RiskEngine::new(limits);
        let mut portfolio = Portfolio::new(dec!(100000));
        risk.mark_start_of_day(dec!(100000));

        // Equity drops to 94000 (−6%)
        apply(&mut portfolio, OrderSide::Buy, dec!(100), dec!(100));
        apply(&mut portfolio, OrderSide::Buy, dec!(1), dec!(40));
        assert_eq!(portfolio.total_equity(), dec!(94000));

        let next_order = order(OrderSide::Sell, dec!(1), dec!(40));
        assert_eq!(
            risk.check(&next_order, &portfolio).reason(),
            Some("kill switch triggered: drawdown threshold breached")
        );
        assert!(risk.is_kill_switch_active());

        // Recovery does not clear the latch
        apply(&mut portfolio, OrderSide::Sell, dec!(1), dec!(100));
        assert_eq!(risk.check(&next_order, &portfolio).reason(), Some("kill switch active"));
        assert_eq!(risk.check(&next_order, &portfolio).reason(), Some("kill switch active"));

        risk.mark_start_of_day(portfolio.total_equity());
        assert!(!risk.is_kill_switch_active());
        assert!(risk.check(&next_order, &portfolio).is_approved());
    }

    #[test]
    fn test_non_positive_baseline_disables_drawdown() {
        let mut risk = RiskEngine::new(limits());
        let portfolio = Portfolio::new(Decimal::ZERO);
        risk.mark_start_of_day(Decimal::ZERO);

        assert!(risk.check(&order(OrderSide::Buy, dec!(1), dec!(10)), &portfolio).is_approved());
        assert!(!risk.is_kill_switch_active());
    }
}
