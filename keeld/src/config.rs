//! Daemon configuration.
//!
//! Loads configuration from environment variables with sensible defaults.
//! Every value is parsed and validated here; the resulting `Config` is
//! immutable.

use crate::error::{DaemonError, DaemonResult};
use keel_domain::Symbol;
use keel_engine::RiskLimits;
use keel_exec::ExecutionConfig;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

// =============================================================================
// Configuration
// =============================================================================

/// Daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Environment (test, development, production)
    pub environment: Environment,

    /// Cash the portfolio starts with
    pub starting_cash: Decimal,

    /// Pre-trade risk limits
    pub risk: RiskLimits,

    /// Submission timeout and retry parameters
    pub execution: ExecutionConfig,

    /// Event loop configuration
    pub dispatcher: DispatcherConfig,

    /// Paper venue simulation
    pub paper: PaperVenueConfig,

    /// Strategy parameter sets, bound to implementations by the embedder
    pub strategies: Vec<StrategyConfig>,
}

/// Event loop configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Bounded wait on an empty queue before re-checking the running flag
    pub poll_interval_ms: u64,
}

impl DispatcherConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Paper venue simulation settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaperVenueConfig {
    /// Fee charged on auto-fills as a fraction of notional (0.001 = 0.1%)
    pub fee_rate: Decimal,
    /// Simulated latency of each venue call
    pub latency_ms: u64,
    /// Delay between acknowledgment and the automatic fill report
    pub fill_delay_ms: u64,
}

/// Environment type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Test environment
    Test,
    /// Development environment
    Development,
    /// Production environment
    Production,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> DaemonResult<Self> {
        // Load .env file if present (ignore errors)
        let _ = dotenvy::dotenv();

        let environment = Self::load_environment()?;
        let starting_cash = Self::load_env("KEEL_STARTING_CASH", Decimal::from(100_000))?;
        if starting_cash < Decimal::ZERO {
            return Err(DaemonError::Config(format!(
                "KEEL_STARTING_CASH must not be negative, got {}",
                starting_cash
            )));
        }

        let risk = Self::load_risk_limits()?;
        let execution = Self::load_execution_config()?;
        let dispatcher = Self::load_dispatcher_config()?;
        let paper = Self::load_paper_config()?;
        let strategies = StrategyConfig::parse_list(
            &env::var("KEEL_STRATEGIES").unwrap_or_default(),
        )?;

        Ok(Self {
            environment,
            starting_cash,
            risk,
            execution,
            dispatcher,
            paper,
            strategies,
        })
    }

    /// Create test configuration.
    pub fn test() -> Self {
        Self {
            environment: Environment::Test,
            dispatcher: DispatcherConfig { poll_interval_ms: 10 },
            paper: PaperVenueConfig { fee_rate: Decimal::ZERO, latency_ms: 0, fill_delay_ms: 10 },
            ..Self::default()
        }
    }

    fn load_environment() -> DaemonResult<Environment> {
        let env_str = env::var("KEEL_ENV").unwrap_or_else(|_| "development".to_string());

        match env_str.to_lowercase().as_str() {
            "test" => Ok(Environment::Test),
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(DaemonError::Config(format!(
                "Invalid KEEL_ENV: {}. Expected: test, development, production",
                other
            ))),
        }
    }

    fn load_risk_limits() -> DaemonResult<RiskLimits> {
        let defaults = RiskLimits::default();

        let max_position_notional =
            Self::load_env("KEEL_MAX_POSITION_NOTIONAL", defaults.max_position_notional())?;
        let max_order_notional =
            Self::load_env("KEEL_MAX_ORDER_NOTIONAL", defaults.max_order_notional())?;
        let max_daily_loss = Self::load_env("KEEL_MAX_DAILY_LOSS", defaults.max_daily_loss())?;
        let max_orders_per_minute =
            Self::load_env("KEEL_MAX_ORDERS_PER_MINUTE", defaults.max_orders_per_minute())?;
        let kill_switch_drawdown_pct = Self::load_env(
            "KEEL_KILL_SWITCH_DRAWDOWN_PCT",
            defaults.kill_switch_drawdown_pct(),
        )?;

        RiskLimits::new(
            max_position_notional,
            max_order_notional,
            max_daily_loss,
            max_orders_per_minute,
            kill_switch_drawdown_pct,
        )
        .map_err(|e| DaemonError::Config(e.to_string()))
    }

    fn load_execution_config() -> DaemonResult<ExecutionConfig> {
        let defaults = ExecutionConfig::default();

        let order_timeout_ms = Self::load_env("KEEL_ORDER_TIMEOUT_MS", defaults.order_timeout_ms())?;
        let max_retries = Self::load_env("KEEL_MAX_RETRIES", defaults.max_retries())?;
        let retry_backoff_ms = Self::load_env("KEEL_RETRY_BACKOFF_MS", defaults.retry_backoff_ms())?;

        ExecutionConfig::new(order_timeout_ms, max_retries, retry_backoff_ms)
            .map_err(|e| DaemonError::Config(e.to_string()))
    }

    fn load_dispatcher_config() -> DaemonResult<DispatcherConfig> {
        let poll_interval_ms = Self::load_env("KEEL_POLL_INTERVAL_MS", 100u64)?;
        if poll_interval_ms == 0 {
            return Err(DaemonError::Config("KEEL_POLL_INTERVAL_MS must be positive".to_string()));
        }

        Ok(DispatcherConfig { poll_interval_ms })
    }

    fn load_paper_config() -> DaemonResult<PaperVenueConfig> {
        let fee_rate = Self::load_env("KEEL_PAPER_FEE_RATE", Decimal::new(1, 3))?; // 0.1%
        if fee_rate < Decimal::ZERO {
            return Err(DaemonError::Config(format!(
                "KEEL_PAPER_FEE_RATE must not be negative, got {}",
                fee_rate
            )));
        }
        let latency_ms = Self::load_env("KEEL_PAPER_LATENCY_MS", 0u64)?;
        let fill_delay_ms = Self::load_env("KEEL_PAPER_FILL_DELAY_MS", 10u64)?;

        Ok(PaperVenueConfig { fee_rate, latency_ms, fill_delay_ms })
    }

    fn load_env<T: FromStr>(key: &str, default: T) -> DaemonResult<T> {
        match env::var(key) {
            Ok(val) => val
                .trim()
                .parse::<T>()
                .map_err(|_| DaemonError::Config(format!("Invalid {} value: {}", key, val))),
            Err(_) => Ok(default),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            starting_cash: Decimal::from(100_000),
            risk: RiskLimits::default(),
            execution: ExecutionConfig::default(),
            dispatcher: DispatcherConfig { poll_interval_ms: 100 },
            paper: PaperVenueConfig {
                fee_rate: Decimal::new(1, 3), // 0.1%
                latency_ms: 0,
                fill_delay_ms: 10,
            },
            strategies: Vec::new(),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Test => write!(f, "test"),
            Environment::Development => write!(f, "development"),
            Environment::Production => write!(f, "production"),
        }
    }
}

// =============================================================================
// Strategy Parameters
// =============================================================================

/// One strategy parameter set: `name:SYMBOL[:key=value;key=value]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyConfig {
    /// Unique strategy name
    pub name: String,
    /// Instrument the strategy trades
    pub symbol: Symbol,
    /// Free-form parameters, interpreted by the strategy
    pub params: BTreeMap<String, String>,
}

impl StrategyConfig {
    /// Parse a comma-separated list. Blank input yields no strategies.
    ///
    /// # Errors
    /// `DaemonError::Config` on a malformed entry or a repeated name
    pub fn parse_list(input: &str) -> DaemonResult<Vec<Self>> {
        let mut strategies: Vec<Self> = Vec::new();

        for entry in input.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let strategy = entry.parse::<Self>()?;
            if strategies.iter().any(|s| s.name == strategy.name) {
                return Err(DaemonError::Config(format!(
                    "Duplicate strategy name in KEEL_STRATEGIES: {}",
                    strategy.name
                )));
            }
            strategies.push(strategy);
        }

        Ok(strategies)
    }

    /// Parameter lookup parsed into `T`
    pub fn param<T: FromStr>(&self, key: &str) -> Option<T> {
        self.params.get(key).and_then(|v| v.parse().ok())
    }
}

impl FromStr for StrategyConfig {
    type Err = DaemonError;

    fn from_str(entry: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| {
            DaemonError::Config(format!("Invalid strategy entry '{}': {}", entry, reason))
        };

        let mut parts = entry.splitn(3, ':');
        let name = parts.next().map(str::trim).filter(|n| !n.is_empty());
        let name = name.ok_or_else(|| invalid("missing name"))?;
        let symbol = parts.next().ok_or_else(|| invalid("missing symbol"))?;
        let symbol = Symbol::new(symbol).map_err(|e| invalid(&e.to_string()))?;

        let mut params = BTreeMap::new();
        if let Some(raw) = parts.next() {
            for pair in raw.split(';').map(str::trim).filter(|p| !p.is_empty()) {
                let (key, value) = pair
                    .split_once('=')
                    .ok_or_else(|| invalid(&format!("parameter '{}' is not key=value", pair)))?;
                params.insert(key.trim().to_string(), value.trim().to_string());
            }
        }

        Ok(Self { name: name.to_string(), symbol, params })
    }
}

// =============================================================================
// Tests
// =============================================================================
