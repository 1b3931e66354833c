//! Keel Domain Layer
//!
//! Pure domain types with zero I/O dependencies.
//! Contains value objects, entities and the event model.

#![warn(clippy::all)]

// Public modules
pub mod entities;
pub mod events;
pub mod value_objects;

// Re-export commonly used types
pub use entities::{new_order_id, Fill, ManagedOrder, Order, OrderId, OrderStatus, Position};
pub use events::{Event, EventPayload, MarketTick, SequenceGenerator};
pub use value_objects::{DomainError, OrderSide, Price, Quantity, Symbol};
