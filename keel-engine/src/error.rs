//! Engine error types.

use thiserror::Error;

/// Errors raised by the portfolio and risk engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Risk limits failed validation
    #[error("Invalid risk limits: {0}")]
    InvalidLimits(String),

    /// Domain error
    #[error("Domain error: {0}")]
    Domain(#[from] keel_domain::DomainError),
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
