//! Keel Execution Layer
//!
//! Order lifecycle against an external venue, with timeout-aware retries.
//!
//! # Architecture
//!
//! ```text
//! Dispatcher → OrderLifecycleManager → VenuePort → venue
//!                     ↑                              │
//!                     └──── on_venue_fill ←──────────┘
//! ```
//!
//! # Components
//!
//! - **Ports**: The `VenuePort` trait every venue adapter implements
//! - **Lifecycle**: Submission, retry, cancel and fill routing per order
//! - **Stub**: `PaperVenue`, an in-process venue for development and tests
//!
//! # Example
//!
//! ```rust,ignore
//! use keel_exec::{ExecutionConfig, OrderLifecycleManager, PaperVenue};
//! use std::sync::Arc;
//!
//! let (venue, fills) = PaperVenue::new();
//! let manager = OrderLifecycleManager::new(Arc::new(venue), ExecutionConfig::default());
//!
//! let order_id = manager.submit(order)?;
//! ```

#![warn(clippy::all)]

pub mod error;
pub mod lifecycle;
pub mod ports;
pub mod stub;

// Re-exports for convenience
pub use error::{ExecError, ExecResult};
pub use lifecycle::{ExecutionConfig, FillCallback, OrderLifecycleManager};
pub use ports::{VenueFill, VenuePort};
pub use stub::PaperVenue;
