//! Daemon error types.

use keel_domain::DomainError;
use keel_engine::EngineError;
use keel_exec::ExecError;
use thiserror::Error;

/// Daemon-level errors.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Domain error
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// Engine error
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Execution error
    #[error("Execution error: {0}")]
    Exec(#[from] ExecError),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Event bus error
    #[error("Event bus error: {0}")]
    EventBus(String),

    /// A strategy with this name is already registered
    #[error("Strategy already registered: {0}")]
    DuplicateStrategy(String),

    /// Event handler panicked
    #[error("Handler panicked: {0}")]
    HandlerPanic(String),
}

/// Result type for daemon operations.
pub type DaemonResult<T> = Result<T, DaemonError>;
