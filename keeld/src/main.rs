//! Keel Daemon
//!
//! Runs the dispatcher against the paper venue until Ctrl-C.
//!
//! # Usage
//!
//! ```bash
//! # Start with default configuration
//! cargo run -p keeld
//!
//! # Start with custom limits
//! KEEL_ENV=test KEEL_MAX_ORDER_NOTIONAL=5000 cargo run -p keeld
//! ```
//!
//! # Environment Variables
//!
//! - `KEEL_ENV`: Environment (test, development, production)
//! - `KEEL_STARTING_CASH`: Starting cash (default: 100000)
//! - `KEEL_MAX_POSITION_NOTIONAL`: Per-symbol exposure cap (default: 50000)
//! - `KEEL_MAX_ORDER_NOTIONAL`: Per-order cap (default: 10000)
//! - `KEEL_MAX_DAILY_LOSS`: Daily loss cap (default: 5000)
//! - `KEEL_MAX_ORDERS_PER_MINUTE`: Order rate cap (default: 60)
//! - `KEEL_KILL_SWITCH_DRAWDOWN_PCT`: Drawdown that halts trading (default: 0.05)
//! - `KEEL_ORDER_TIMEOUT_MS`: Venue acknowledgment timeout (default: 2000)
//! - `KEEL_MAX_RETRIES`: Submission retries after a timeout (default: 3)
//! - `KEEL_RETRY_BACKOFF_MS`: Linear backoff step (default: 250)
//! - `KEEL_POLL_INTERVAL_MS`: Dispatcher idle poll (default: 100)
//! - `KEEL_PAPER_FEE_RATE`: Paper venue fee rate (default: 0.001)
//! - `KEEL_PAPER_LATENCY_MS`: Paper venue latency (default: 0)
//! - `KEEL_PAPER_FILL_DELAY_MS`: Paper venue ack-to-fill delay (default: 10)
//! - `KEEL_STRATEGIES`: Strategy parameter sets, `name:SYMBOL[:k=v;k=v],...`

use std::sync::Arc;
use std::time::Duration;

use keel_exec::PaperVenue;
use keeld::{spawn_fill_pump, Config, Dispatcher};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("keeld=info".parse()?))
        .init();

    // Load configuration
    let config = Config::from_env()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %config.environment,
        starting_cash = %config.starting_cash,
        risk = %config.risk,
        "Keel Daemon"
    );

    for strategy in &config.strategies {
        info!(
            name = %strategy.name,
            symbol = %strategy.symbol,
            params = strategy.params.len(),
            "Strategy configured"
        );
    }
    if !config.strategies.is_empty() {
        warn!("Strategy implementations are registered by embedders; the standalone daemon runs none");
    }

    // Paper venue and its report stream
    let (venue, reports) = PaperVenue::new();
    let venue = Arc::new(
        venue
            .with_auto_fill(config.paper.fee_rate)
            .with_latency(Duration::from_millis(config.paper.latency_ms))
            .with_fill_delay(Duration::from_millis(config.paper.fill_delay_ms)),
    );

    let mut dispatcher = Dispatcher::new(&config, venue)?;
    let pump = spawn_fill_pump(reports, dispatcher.lifecycle().clone());
    dispatcher.mark_start_of_day()?;

    // Stop on Ctrl-C
    let stop = dispatcher.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            stop.stop();
        }
    });

    dispatcher.run().await?;
    pump.abort();

    let stats = dispatcher.stats().snapshot();
    info!(
        events_processed = stats.events_processed,
        orders_submitted = stats.orders_submitted,
        orders_rejected = stats.orders_rejected,
        equity = %dispatcher.portfolio().total_equity(),
        "Keel Daemon stopped"
    );
    let metrics = dispatcher.stats().render()?;
    info!(%metrics, "Final counters");

    Ok(())
}
