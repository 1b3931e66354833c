//! Domain Entities for Keel
//!
//! Orders, managed orders, fills and positions.
//! Entities with lifecycle carry their own transition rules.

use crate::value_objects::{DomainError, OrderSide, Price, Quantity, Symbol};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// =============================================================================
// Identifiers
// =============================================================================

/// Unique identifier for an Order (UUID v7, time-ordered)
pub type OrderId = Uuid;

/// Allocate a new order id
pub fn new_order_id() -> OrderId {
    Uuid::now_v7()
}

// =============================================================================
// Order
// =============================================================================

/// An order as emitted by a strategy.
///
/// `id` stays `None` until the lifecycle manager assigns one; after that it
/// never changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: Option<OrderId>,
    pub symbol: Symbol,
    pub side: OrderSide,
    pub quantity: Quantity,
    pub price: Price,
    pub strategy_name: String,
}

impl Order {
    /// Create a new order without an id
    pub fn new(
        symbol: Symbol,
        side: OrderSide,
        quantity: Quantity,
        price: Price,
        strategy_name: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            symbol,
            side,
            quantity,
            price,
            strategy_name: strategy_name.into(),
        }
    }

    /// Dollar-value exposure of this order (`quantity × price`)
    pub fn notional(&self) -> Decimal {
        self.quantity.as_decimal() * self.price.as_decimal()
    }

    /// Quantity signed by side (+ for buy, - for sell)
    pub fn signed_quantity(&self) -> Decimal {
        self.side.signed(self.quantity)
    }
}

// =============================================================================
// Order Status
// =============================================================================

/// Lifecycle status of a managed order.
///
/// ```text
/// Pending → Submitted → Acknowledged → Filled
///              ↺ (timeout, retry)  ↘ Cancelled
///              ↘ Rejected
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Registered, no attempt made yet
    Pending,
    /// An attempt is in flight
    Submitted,
    /// Venue confirmed receipt
    Acknowledged,
    /// Venue reported execution
    Filled,
    /// Cancelled after acknowledgment
    Cancelled,
    /// Retries exhausted or venue refused the order
    Rejected,
}

impl OrderStatus {
    /// `Filled`, `Cancelled` and `Rejected` never change again
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected)
    }

    /// Whether the lifecycle permits moving from `self` to `next`
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Submitted)
                | (Submitted, Submitted)
                | (Submitted, Acknowledged)
                | (Submitted, Rejected)
                | (Acknowledged, Filled)
                | (Acknowledged, Cancelled)
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Submitted => "submitted",
            OrderStatus::Acknowledged => "acknowledged",
            OrderStatus::Filled => "filled",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Rejected => "rejected",
        };
        write!(f, "{}", s)
    }
}

// =============================================================================
// Managed Order
// =============================================================================

/// An order plus its lifecycle bookkeeping.
///
/// Only the order lifecycle manager holds the authoritative copy; everyone
/// else sees clones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagedOrder {
    id: OrderId,
    pub order: Order,
    pub venue_order_id: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub retries: u32,
    pub status: OrderStatus,
    pub rejection_reason: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ManagedOrder {
    /// Wrap an order that already carries an id. Status starts at `Pending`.
    pub fn new(order: Order) -> Result<Self, DomainError> {
        let id = order.id.ok_or_else(|| {
            DomainError::InvalidStateTransition("Managed order requires an assigned id".to_string())
        })?;

        let now = Utc::now();
        Ok(Self {
            id,
            order,
            venue_order_id: None,
            submitted_at: now,
            retries: 0,
            status: OrderStatus::Pending,
            rejection_reason: None,
            updated_at: now,
        })
    }

    /// The assigned order id
    pub fn id(&self) -> OrderId {
        self.id
    }

    fn transition(&mut self, next: OrderStatus) -> Result<(), DomainError> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::InvalidStateTransition(format!(
                "{} -> {}",
                self.status, next
            )));
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// A submission attempt is starting
    pub fn mark_submitted(&mut self) -> Result<(), DomainError> {
        self.transition(OrderStatus::Submitted)?;
        self.submitted_at = self.updated_at;
        Ok(())
    }

    /// Venue accepted the order under `venue_order_id`
    pub fn acknowledge(&mut self, venue_order_id: String) -> Result<(), DomainError> {
        self.transition(OrderStatus::Acknowledged)?;
        self.venue_order_id = Some(venue_order_id);
        Ok(())
    }

    /// Venue reported an execution
    pub fn mark_filled(&mut self) -> Result<(), DomainError> {
        self.transition(OrderStatus::Filled)
    }

    /// Venue confirmed the cancel
    pub fn mark_cancelled(&mut self) -> Result<(), DomainError> {
        self.transition(OrderStatus::Cancelled)
    }

    /// Terminal failure with a reason
    pub fn reject(&mut self, reason: impl Into<String>) -> Result<(), DomainError> {
        self.transition(OrderStatus::Rejected)?;
        self.rejection_reason = Some(reason.into());
        Ok(())
    }
}

// =============================================================================
// Fill
// =============================================================================

/// An execution reported by the venue. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fill {
    order_id: OrderId,
    strategy_name: String,
    symbol: Symbol,
    side: OrderSide,
    quantity: Quantity,
    price: Price,
    timestamp: DateTime<Utc>,
    fee: Decimal,
}

impl Fill {
    /// Build a fill.
    ///
    /// # Errors
    /// Returns `DomainError::InvalidFee` if `fee` is negative
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        order_id: OrderId,
        strategy_name: impl Into<String>,
        symbol: Symbol,
        side: OrderSide,
        quantity: Quantity,
        price: Price,
        timestamp: DateTime<Utc>,
        fee: Decimal,
    ) -> Result<Self, DomainError> {
        if fee < Decimal::ZERO {
            return Err(DomainError::InvalidFee(format!("Fee must not be negative, got {}", fee)));
        }

        Ok(Self {
            order_id,
            strategy_name: strategy_name.into(),
            symbol,
            side,
            quantity,
            price,
            timestamp,
            fee,
        })
    }

    /// Full fill of `order` at `price`, stamped now
    pub fn for_order(
        order_id: OrderId,
        order: &Order,
        price: Price,
        fee: Decimal,
    ) -> Result<Self, DomainError> {
        Self::new(
            order_id,
            order.strategy_name.clone(),
            order.symbol.clone(),
            order.side,
            order.quantity,
            price,
            Utc::now(),
            fee,
        )
    }

    pub fn order_id(&self) -> OrderId {
        self.order_id
    }

    pub fn strategy_name(&self) -> &str {
        &self.strategy_name
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn side(&self) -> OrderSide {
        self.side
    }

    pub fn quantity(&self) -> Quantity {
        self.quantity
    }

    pub fn price(&self) -> Price {
        self.price
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn fee(&self) -> Decimal {
        self.fee
    }

    /// `quantity × price`, `None` if it leaves the `Decimal` range
    pub fn notional(&self) -> Option<Decimal> {
        self.quantity.as_decimal().checked_mul(self.price.as_decimal())
    }

    /// Quantity signed by side
    pub fn signed_quantity(&self) -> Decimal {
        self.side.signed(self.quantity)
    }
}

// =============================================================================
// Position
// =============================================================================

/// Net holding in one symbol.
///
/// # Invariants
/// - `quantity` is signed; zero means flat
/// - `avg_price` is zero whenever `quantity` is zero
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: Symbol,
    pub quantity: Decimal,
    pub avg_price: Decimal,
    pub realized_pnl: Decimal,
}

impl Position {
    /// A flat position
    pub fn new(symbol: Symbol) -> Self {
        Self {
            symbol,
            quantity: Decimal::ZERO,
            avg_price: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.quantity.is_zero()
    }

    pub fn is_long(&self) -> bool {
        self.quantity > Decimal::ZERO
    }

    pub fn is_short(&self) -> bool {
        self.quantity < Decimal::ZERO
    }

    /// Mark-to-market PnL of the open quantity
    pub fn unrealized_pnl(&self, mark: Decimal) -> Decimal {
        if self.is_flat() {
            return Decimal::ZERO;
        }
        (mark - self.avg_price) * self.quantity
    }

    /// Apply a signed fill quantity at `price`, charging `fee` against
    /// realized PnL when the fill reduces or flips the position.
    ///
    /// Returns the realized PnL produced by this fill. Every new value is
    /// computed before any field is written, so an error leaves the position
    /// as it was.
    ///
    /// # Errors
    /// `DomainError::Overflow` if an intermediate value leaves the `Decimal`
    /// range
    pub fn apply_fill(
        &mut self,
        signed_qty: Decimal,
        price: Decimal,
        fee: Decimal,
    ) -> Result<Decimal, DomainError> {
        if signed_qty.is_zero() {
            return Ok(Decimal::ZERO);
        }

        let same_direction = (self.is_long() && signed_qty > Decimal::ZERO)
            || (self.is_short() && signed_qty < Decimal::ZERO);

        if self.is_flat() || same_direction {
            let old_abs = self.quantity.abs();
            let add_abs = signed_qty.abs();
            let new_abs = in_range(old_abs.checked_add(add_abs), "position size")?;
            let weighted = old_abs
                .checked_mul(self.avg_price)
                .zip(add_abs.checked_mul(price))
                .and_then(|(old, new)| old.checked_add(new));
            let avg_price = in_range(weighted.and_then(|w| w.checked_div(new_abs)), "average price")?;
            let quantity = in_range(self.quantity.checked_add(signed_qty), "position size")?;

            self.avg_price = avg_price;
            self.quantity = quantity;
            return Ok(Decimal::ZERO);
        }

        let old_abs = self.quantity.abs();
        let fill_abs = signed_qty.abs();
        let old_sign = if self.is_long() { Decimal::ONE } else { Decimal::NEGATIVE_ONE };
        let closing = fill_abs.min(old_abs);

        let realized = in_range(
            price
                .checked_sub(self.avg_price)
                .and_then(|edge| edge.checked_mul(closing))
                .and_then(|gross| gross.checked_mul(old_sign))
                .and_then(|gross| gross.checked_sub(fee)),
            "realized PnL",
        )?;
        let realized_pnl = in_range(self.realized_pnl.checked_add(realized), "realized PnL")?;
        let quantity = in_range(self.quantity.checked_add(signed_qty), "position size")?;

        self.realized_pnl = realized_pnl;
        if fill_abs > old_abs {
            // Flip: the excess opens a new position at the fill price
            self.quantity = quantity;
            self.avg_price = price;
        } else if fill_abs == old_abs {
            self.quantity = Decimal::ZERO;
            self.avg_price = Decimal::ZERO;
        } else {
            self.quantity = quantity;
        }

        Ok(realized)
    }
}

fn in_range(value: Option<Decimal>, what: &str) -> Result<Decimal, DomainError> {
    value.ok_or_else(|| DomainError::Overflow(format!("{} out of range", what)))
}

// =============================================================================
// Tests
// =============================================================================
