//! Portfolio: cash, positions and PnL.
//!
//! The portfolio changes only through [`Portfolio::on_fill`]. Everything else
//! is a read, which is what the risk engine relies on.

use keel_domain::{DomainError, Fill, OrderSide, Position, Symbol};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::debug;

use crate::error::EngineResult;

// =============================================================================
// Portfolio
// =============================================================================

/// Ledger of cash and per-symbol positions.
///
/// # Invariants
/// - `total_equity = cash + Σ quantity × (last price, or avg price if none)`
/// - Positions are only created and mutated by fills
#[derive(Debug, Clone)]
pub struct Portfolio {
    cash: Decimal,
    positions: HashMap<Symbol, Position>,
    last_prices: HashMap<Symbol, Decimal>,
}

impl Portfolio {
    /// Empty portfolio holding `starting_cash`
    pub fn new(starting_cash: Decimal) -> Self {
        Self {
            cash: starting_cash,
            positions: HashMap::new(),
            last_prices: HashMap::new(),
        }
    }

    /// Apply an execution.
    ///
    /// Cash moves by the fill notional (minus for buys, plus for sells) and
    /// always pays the fee. The position update, including realized PnL on
    /// reducing or flipping fills, is [`Position::apply_fill`].
    ///
    /// Returns the realized PnL produced by this fill.
    ///
    /// # Errors
    /// `EngineError::Domain` if cash or the position would leave the
    /// `Decimal` range. Nothing is modified in that case.
    pub fn on_fill(&mut self, fill: &Fill) -> EngineResult<Decimal> {
        let fee = fill.fee();
        let cash = fill
            .notional()
            .and_then(|notional| match fill.side() {
                OrderSide::Buy => notional.checked_add(fee).and_then(|cost| self.cash.checked_sub(cost)),
                OrderSide::Sell => {
                    notional.checked_sub(fee).and_then(|proceeds| self.cash.checked_add(proceeds))
                },
            })
            .ok_or_else(|| {
                DomainError::Overflow(format!("cash after {} fill out of range", fill.symbol()))
            })?;

        let price = fill.price().as_decimal();
        let mut position = self
            .positions
            .get(fill.symbol())
            .cloned()
            .unwrap_or_else(|| Position::new(fill.symbol().clone()));
        let realized = position.apply_fill(fill.signed_quantity(), price, fee)?;

        debug!(
            symbol = %fill.symbol(),
            side = %fill.side(),
            quantity = %fill.quantity(),
            price = %price,
            position_quantity = %position.quantity,
            avg_price = %position.avg_price,
            realized = %realized,
            "Fill applied"
        );

        self.cash = cash;
        self.positions.insert(fill.symbol().clone(), position);
        self.last_prices.insert(fill.symbol().clone(), price);
        Ok(realized)
    }

    /// `cash + Σ quantity × mark`, marking each position at its last fill
    /// price or, if none was seen, its average price
    pub fn total_equity(&self) -> Decimal {
        self.positions.values().fold(self.cash, |equity, position| {
            equity + position.quantity * self.mark(position)
        })
    }

    /// `total_equity − baseline`
    pub fn daily_pnl(&self, baseline: Decimal) -> Decimal {
        self.total_equity() - baseline
    }

    pub fn cash(&self) -> Decimal {
        self.cash
    }

    pub fn position(&self, symbol: &Symbol) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    /// Signed quantity held in `symbol` (zero when never traded)
    pub fn position_quantity(&self, symbol: &Symbol) -> Decimal {
        self.positions.get(symbol).map(|p| p.quantity).unwrap_or(Decimal::ZERO)
    }

    pub fn last_price(&self, symbol: &Symbol) -> Option<Decimal> {
        self.last_prices.get(symbol).copied()
    }

    /// Realized PnL summed across positions
    pub fn realized_pnl(&self) -> Decimal {
        self.positions.values().map(|p| p.realized_pnl).sum()
    }

    /// Open PnL at current marks
    pub fn unrealized_pnl(&self) -> Decimal {
        self.positions.values().map(|p| p.unrealized_pnl(self.mark(p))).sum()
    }

    fn mark(&self, position: &Position) -> Decimal {
        self.last_prices.get(&position.symbol).copied().unwrap_or(position.avg_price)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use keel_domain::{new_order_id, Price, Quantity};
    use rust_decimal_macros::dec;

    fn fill(symbol: &str, side: OrderSide, qty: Decimal, px: Decimal, fee: Decimal) -> Fill {
        Fill::new(
            new_order_id(),
            "test",
            Symbol::new(symbol).unwrap(),
            side,
            Quantity::new(qty).unwrap(),
            Price::new(px).unwrap(),
            Utc::now(),
            fee,
        )
        .unwrap()
    }

    #[test]
    fn test_buy_debits_cash_and_opens_position() {
        let mut portfolio = Portfolio::new(dec!(10000));
        let realized =
            portfolio.on_fill(&fill("AAPL", OrderSide::Buy, dec!(10), dec!(50), dec!(1))).unwrap();

        assert_eq!(realized, Decimal::ZERO);
        assert_eq!(portfolio.cash(), dec!(9499));

        let symbol = Symbol::new("AAPL").unwrap();
        let pos = portfolio.position(&symbol).unwrap();
        assert_eq!(pos.quantity, dec!(10));
        assert_eq!(pos.avg_price, dec!(50));
        // Opening fee hits cash only
        assert_eq!(pos.realized_pnl, Decimal::ZERO);
        assert_eq!(portfolio.last_price(&symbol), Some(dec!(50)));
    }

    #[test]
    fn test_flip_scenario() {
        let mut portfolio = Portfolio::new(dec!(10000));
        portfolio.on_fill(&fill("AAPL", OrderSide::Buy, dec!(10), dec!(50), Decimal::ZERO)).unwrap();
        let realized =
            portfolio.on_fill(&fill("AAPL", OrderSide::Sell, dec!(15), dec!(60), dec!(2))).unwrap();

        assert_eq!(realized, dec!(98));
        assert_eq!(portfolio.realized_pnl(), dec!(98));

        let symbol = Symbol::new("AAPL").unwrap();
        let pos = portfolio.position(&symbol).unwrap();
        assert_eq!(pos.quantity, dec!(-5));
        assert_eq!(pos.avg_price, dec!(60));

        // 10000 − 500 + 900 − 2
        assert_eq!(portfolio.cash(), dec!(10398));
        // Short 5 marked at 60 = −300
        assert_eq!(portfolio.total_equity(), dec!(10098));
    }

    #[test]
    fn test_total_equity_marks_at_last_price() {
        let mut portfolio = Portfolio::new(dec!(100000));
        portfolio.on_fill(&fill("AAPL", OrderSide::Buy, dec!(100), dec!(100), Decimal::ZERO)).unwrap();
        assert_eq!(portfolio.total_equity(), dec!(100000));

        // A later, smaller fill moves the mark for the whole position
        portfolio.on_fill(&fill("AAPL", OrderSide::Buy, dec!(1), dec!(40), Decimal::ZERO)).unwrap();
        // cash 89960, 101 × 40 = 4040
        assert_eq!(portfolio.total_equity(), dec!(94000));
        assert_eq!(portfolio.daily_pnl(dec!(100000)), dec!(-6000));
    }

    #[test]
    fn test_multiple_symbols() {
        let mut portfolio = Portfolio::new(dec!(1000));
        portfolio.on_fill(&fill("AAPL", OrderSide::Buy, dec!(2), dec!(100), Decimal::ZERO)).unwrap();
        portfolio.on_fill(&fill("MSFT", OrderSide::Sell, dec!(1), dec!(300), Decimal::ZERO)).unwrap();

        assert_eq!(portfolio.positions().count(), 2);
        assert_eq!(portfolio.position_quantity(&Symbol::new("MSFT").unwrap()), dec!(-1));
        assert_eq!(portfolio.position_quantity(&Symbol::new("TSLA").unwrap()), Decimal::ZERO);
        assert_eq!(portfolio.cash(), dec!(1100));
        assert_eq!(portfolio.total_equity(), dec!(1000));
    }

    #[test]
    fn test_unrealized_pnl() {
        let mut portfolio = Portfolio::new(dec!(1000));
        portfolio.on_fill(&fill("AAPL", OrderSide::Buy, dec!(10), dec!(10), Decimal::ZERO)).unwrap();
        portfolio.on_fill(&fill("AAPL", OrderSide::Buy, dec!(10), dec!(20), Decimal::ZERO)).unwrap();

        // avg 15, mark 20
        assert_eq!(portfolio.unrealized_pnl(), dec!(100));
    }

    #[test]
    fn test_round_trip_to_flat() {
        let mut portfolio = Portfolio::new(dec!(1000));
        portfolio.on_fill(&fill("AAPL", OrderSide::Sell, dec!(4), dec!(25), dec!(0.5))).unwrap();
        portfolio.on_fill(&fill("AAPL", OrderSide::Buy, dec!(4), dec!(20), dec!(0.5))).unwrap();

        let symbol = Symbol::new("AAPL").unwrap();
        let pos = portfolio.position(&symbol).unwrap();
        assert!(pos.is_flat());
        assert_eq!(pos.avg_price, Decimal::ZERO);
        assert_eq!(pos.realized_pnl, dec!(19.5));
        assert_eq!(portfolio.cash(), dec!(1019));
        assert_eq!(portfolio.total_equity(), dec!(1019));
    }

    #[test]
    fn test_overflowing_fill_changes_nothing() {
        let mut portfolio = Portfolio::new(dec!(1000));
        portfolio.on_fill(&fill("AAPL", OrderSide::Buy, dec!(2), dec!(100), Decimal::ZERO)).unwrap();
        let symbol = Symbol::new("AAPL").unwrap();

        let huge = fill("AAPL", OrderSide::Buy, dec!(2), Decimal::MAX, Decimal::ZERO);
        let result = portfolio.on_fill(&huge);
        assert!(matches!(
            result,
            Err(crate::EngineError::Domain(DomainError::Overflow(_)))
        ));

        assert_eq!(portfolio.cash(), dec!(800));
        assert_eq!(portfolio.position_quantity(&symbol), dec!(2));
        assert_eq!(portfolio.last_price(&symbol), Some(dec!(100)));
    }
}
