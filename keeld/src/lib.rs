//! Keel Daemon Library
//!
//! Runtime for the Keel execution core.
//!
//! # Architecture
//!
//! ```text
//! Market data ─┐
//!              ├→ Event queue → Dispatcher → Risk Engine → Order Lifecycle → Venue
//! Fills ───────┘                   │                                          │
//!    ↑                             └→ Portfolio, Strategies                   │
//!    └──────────── Fill pump ←──────────── execution reports ←────────────────┘
//! ```
//!
//! # Components
//!
//! - **Dispatcher**: Single event loop that owns all engine state
//! - **Event Queue**: FIFO of market data, order and fill events
//! - **Strategy**: Capability implemented by trading strategies
//! - **Fill Pump**: Feeds venue execution reports back to the lifecycle manager
//! - **Stats**: Prometheus counters for processed events and order outcomes
//! - **Config**: Environment-based configuration
//!
//! # Example
//!
//! ```rust,ignore
//! use keeld::{Config, Dispatcher};
//! use keel_exec::PaperVenue;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::from_env().expect("Failed to load config");
//!     let (venue, _reports) = PaperVenue::new();
//!     let mut dispatcher = Dispatcher::new(&config, Arc::new(venue)).expect("dispatcher");
//!     dispatcher.run().await.expect("Dispatcher error");
//! }
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod event_bus;
pub mod fills;
pub mod stats;
pub mod strategy;

// Re-exports for convenience
pub use config::{Config, DispatcherConfig, Environment, PaperVenueConfig, StrategyConfig};
pub use dispatcher::Dispatcher;
pub use error::{DaemonError, DaemonResult};
pub use event_bus::{event_queue, EventQueue, Publisher, StopHandle};
pub use fills::spawn_fill_pump;
pub use stats::{EngineStats, StatsSnapshot};
pub use strategy::Strategy;
