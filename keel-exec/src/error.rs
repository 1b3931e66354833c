//! Execution layer error types.

use keel_domain::OrderId;
use thiserror::Error;

/// Errors that can occur during execution operations.
#[derive(Debug, Error)]
pub enum ExecError {
    /// Venue did not answer in time. Retried by the lifecycle manager.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Venue communication error
    #[error("Venue error: {0}")]
    Venue(String),

    /// Order was refused by the venue
    #[error("Order rejected: {0}")]
    OrderRejected(String),

    /// Order id is already managed
    #[error("Order already managed: {0}")]
    DuplicateOrder(OrderId),

    /// Order id is not managed
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// Order table lock was poisoned
    #[error("Lock error: {0}")]
    Lock(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Domain error
    #[error("Domain error: {0}")]
    Domain(#[from] keel_domain::DomainError),
}

impl ExecError {
    /// Transient failures that warrant another submission attempt
    pub fn is_timeout(&self) -> bool {
        matches!(self, ExecError::Timeout(_))
    }
}

/// Result type for execution operations.
pub type ExecResult<T> = Result<T, ExecError>;
