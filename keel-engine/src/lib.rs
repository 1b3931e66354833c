//! Keel Engine Layer
//!
//! Portfolio accounting and pre-trade risk.
//! Pure, synchronous, deterministic. No I/O.

#![warn(clippy::all)]

pub mod error;
pub mod portfolio;
pub mod risk;

pub use error::{EngineError, EngineResult};
pub use portfolio::Portfolio;
pub use risk::{RiskDecision, RiskEngine, RiskLimits};
