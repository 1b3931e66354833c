//! Order lifecycle manager.
//!
//! Owns every submitted order from registration to a terminal status and is
//! the only component that mutates a `ManagedOrder`.
//!
//! # Flow
//!
//! ```text
//! submit → Pending → Submitted ──ack──→ Acknowledged ──fill──→ Filled
//!                     │    ↑                  └──cancel──→ Cancelled
//!              timeout│    │sleep(backoff × retries)
//!                     └────┘
//!                     └──error, or retries exhausted──→ Rejected
//! ```
//!
//! Timeouts are transient and retried with linear backoff. Any other venue
//! error is a refusal and fails the order at once.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use keel_domain::{new_order_id, DomainError, Fill, ManagedOrder, Order, OrderId, OrderStatus};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{ExecError, ExecResult};
use crate::ports::VenuePort;

/// Receives every fill that matches a managed order
pub type FillCallback = Arc<dyn Fn(Fill) + Send + Sync>;

// =============================================================================
// Execution Config
// =============================================================================

/// Timeout and retry parameters for order submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionConfig {
    order_timeout_ms: u64,
    max_retries: u32,
    retry_backoff_ms: u64,
}

impl ExecutionConfig {
    /// Create a validated config
    ///
    /// # Errors
    /// Returns `ExecError::Config` if `order_timeout_ms` is 0
    pub fn new(order_timeout_ms: u64, max_retries: u32, retry_backoff_ms: u64) -> ExecResult<Self> {
        if order_timeout_ms == 0 {
            return Err(ExecError::Config("order_timeout_ms must be positive".to_string()));
        }

        Ok(Self { order_timeout_ms, max_retries, retry_backoff_ms })
    }

    /// Bound on each venue call
    pub fn order_timeout(&self) -> Duration {
        Duration::from_millis(self.order_timeout_ms)
    }

    pub fn order_timeout_ms(&self) -> u64 {
        self.order_timeout_ms
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn retry_backoff_ms(&self) -> u64 {
        self.retry_backoff_ms
    }

    /// Sleep after the `retries`-th timeout (linear, not exponential)
    pub fn backoff(&self, retries: u32) -> Duration {
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(u64::from(retries)))
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            order_timeout_ms: 2000,
            max_retries: 3,
            retry_backoff_ms: 250,
        }
    }
}

// =============================================================================
// Shared State
// =============================================================================

#[derive(Default)]
struct OrderTable {
    orders: HashMap<OrderId, ManagedOrder>,
    by_venue_id: HashMap<String, OrderId>,
}

struct Shared<V> {
    venue: Arc<V>,
    config: ExecutionConfig,
    table: RwLock<OrderTable>,
    fill_callback: RwLock<Option<FillCallback>>,
}

impl<V> Shared<V> {
    fn read(&self) -> ExecResult<RwLockReadGuard<'_, OrderTable>> {
        self.table
            .read()
            .map_err(|e| ExecError::Lock(format!("Failed to acquire read lock: {}", e)))
    }

    fn write(&self) -> ExecResult<RwLockWriteGuard<'_, OrderTable>> {
        self.table
            .write()
            .map_err(|e| ExecError::Lock(format!("Failed to acquire write lock: {}", e)))
    }

    /// Apply `f` to one managed order under the write lock
    fn update<F>(&self, order_id: OrderId, f: F) -> ExecResult<()>
    where
        F: FnOnce(&mut ManagedOrder) -> Result<(), DomainError>,
    {
        let mut table = self.write()?;
        let managed = table.orders.get_mut(&order_id).ok_or(ExecError::OrderNotFound(order_id))?;
        f(managed)?;
        Ok(())
    }

    fn acknowledge(&self, order_id: OrderId, venue_order_id: String) -> ExecResult<()> {
        let mut table = self.write()?;
        let managed = table.orders.get_mut(&order_id).ok_or(ExecError::OrderNotFound(order_id))?;
        managed.acknowledge(venue_order_id.clone())?;
        table.by_venue_id.insert(venue_order_id, order_id);
        Ok(())
    }
}

// =============================================================================
// Order Lifecycle Manager
// =============================================================================

/// Submits orders to a venue with bounded, timeout-aware retries and tracks
/// them until they reach a terminal status.
///
/// Cloning is cheap and every clone shares the same order table, so the
/// dispatcher and the venue fill pump can each hold one.
pub struct OrderLifecycleManager<V: VenuePort> {
    shared: Arc<Shared<V>>,
}

impl<V: VenuePort> Clone for OrderLifecycleManager<V> {
    fn clone(&self) -> Self {
        Self { shared: Arc::clone(&self.shared) }
    }
}

impl<V: VenuePort + 'static> OrderLifecycleManager<V> {
    pub fn new(venue: Arc<V>, config: ExecutionConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                venue,
                config,
                table: RwLock::new(OrderTable::default()),
                fill_callback: RwLock::new(None),
            }),
        }
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.shared.config
    }

    /// Register the receiver of matched fills, replacing any previous one
    pub fn set_fill_callback(&self, callback: FillCallback) -> ExecResult<()> {
        let mut slot = self
            .shared
            .fill_callback
            .write()
            .map_err(|e| ExecError::Lock(format!("Failed to acquire callback lock: {}", e)))?;
        *slot = Some(callback);
        Ok(())
    }

    /// Register `order` and start submitting it in the background.
    ///
    /// Returns as soon as the order is registered; the venue has not been
    /// contacted yet.
    pub fn submit(&self, order: Order) -> ExecResult<OrderId> {
        self.submit_tracked(order).map(|(order_id, _)| order_id)
    }

    /// Like [`submit`](Self::submit), also returning the submission task.
    ///
    /// The task resolves to the status the order settled in once submission
    /// ends (`Acknowledged` or `Rejected`).
    ///
    /// # Errors
    /// `ExecError::DuplicateOrder` if the order carries an id already managed
    pub fn submit_tracked(
        &self,
        mut order: Order,
    ) -> ExecResult<(OrderId, JoinHandle<ExecResult<OrderStatus>>)> {
        let order_id = *order.id.get_or_insert_with(new_order_id);
        let managed = ManagedOrder::new(order.clone())?;

        {
            let mut table = self.shared.write()?;
            if table.orders.contains_key(&order_id) {
                return Err(ExecError::DuplicateOrder(order_id));
            }
            table.orders.insert(order_id, managed);
        }

        info!(
            %order_id,
            symbol = %order.symbol,
            side = %order.side,
            quantity = %order.quantity,
            price = %order.price,
            strategy = %order.strategy_name,
            "Order registered"
        );

        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(async move {
            let result = run_submission(shared, order_id, order).await;
            if let Err(e) = &result {
                error!(%order_id, error = %e, "Submission task failed");
            }
            result
        });

        Ok((order_id, handle))
    }

    /// Cancel an acknowledged order.
    ///
    /// Returns `Ok(false)` without contacting the venue when the order is
    /// unknown, not yet acknowledged, or already terminal, and `Ok(false)`
    /// when the venue refuses. A failing venue call is an error and leaves
    /// the order `Acknowledged`.
    pub async fn cancel(&self, order_id: OrderId) -> ExecResult<bool> {
        let venue_order_id = {
            let table = self.shared.read()?;
            match table.orders.get(&order_id) {
                None => {
                    debug!(%order_id, "Cancel requested for unknown order");
                    return Ok(false);
                },
                Some(managed) => match (&managed.venue_order_id, managed.status) {
                    (Some(venue_order_id), OrderStatus::Acknowledged) => venue_order_id.clone(),
                    (_, status) => {
                        debug!(%order_id, %status, "Order not cancellable");
                        return Ok(false);
                    },
                },
            }
        };

        let timeout = self.shared.config.order_timeout();
        let cancelled =
            match tokio::time::timeout(timeout, self.shared.venue.cancel_order(&venue_order_id))
                .await
            {
                Ok(result) => result?,
                Err(_) => {
                    return Err(ExecError::Timeout(format!(
                        "Cancel of {} not answered within {}ms",
                        venue_order_id,
                        self.shared.config.order_timeout_ms
                    )))
                },
            };

        if !cancelled {
            info!(%order_id, %venue_order_id, "Venue refused cancel");
            return Ok(false);
        }

        let mut table = self.shared.write()?;
        let managed = table.orders.get_mut(&order_id).ok_or(ExecError::OrderNotFound(order_id))?;
        if managed.status != OrderStatus::Acknowledged {
            // A fill won the race while the cancel was in flight
            warn!(%order_id, status = %managed.status, "Order moved on during cancel");
            return Ok(false);
        }
        managed.mark_cancelled()?;

        info!(%order_id, %venue_order_id, "Order cancelled");
        Ok(true)
    }

    /// Handle an execution report from the venue.
    ///
    /// Fills matching a managed order are always forwarded to the fill
    /// callback, even when a cancel got there first. Fills for unknown venue
    /// ids are logged and dropped.
    ///
    /// Returns whether the fill was forwarded.
    pub fn on_venue_fill(&self, venue_order_id: &str, fill: Fill) -> ExecResult<bool> {
        {
            let mut table = self.shared.write()?;
            let order_id = match table.by_venue_id.get(venue_order_id) {
                Some(order_id) => *order_id,
                None => {
                    warn!(venue_order_id, "Fill for unknown venue order dropped");
                    return Ok(false);
                },
            };

            let managed =
                table.orders.get_mut(&order_id).ok_or(ExecError::OrderNotFound(order_id))?;
            match managed.status {
                OrderStatus::Acknowledged => {
                    managed.mark_filled()?;
                    info!(%order_id, venue_order_id, "Order filled");
                },
                OrderStatus::Filled => {
                    debug!(%order_id, venue_order_id, "Further fill on filled order");
                },
                OrderStatus::Cancelled => {
                    warn!(%order_id, venue_order_id, "Fill reported for cancelled order");
                },
                status => {
                    warn!(%order_id, venue_order_id, %status, "Fill in unexpected state dropped");
                    return Ok(false);
                },
            }
        }

        let callback = self
            .shared
            .fill_callback
            .read()
            .map_err(|e| ExecError::Lock(format!("Failed to acquire callback lock: {}", e)))?
            .clone();

        match callback {
            Some(callback) => {
                callback(fill);
                Ok(true)
            },
            None => {
                warn!(order_id = %fill.order_id(), "No fill callback registered, fill dropped");
                Ok(false)
            },
        }
    }

    /// Current status, `None` if the order is unknown
    pub fn get_status(&self, order_id: OrderId) -> ExecResult<Option<OrderStatus>> {
        Ok(self.shared.read()?.orders.get(&order_id).map(|m| m.status))
    }

    /// Snapshot of one managed order
    pub fn get_order(&self, order_id: OrderId) -> ExecResult<Option<ManagedOrder>> {
        Ok(self.shared.read()?.orders.get(&order_id).cloned())
    }

    /// Orders not yet in a terminal status
    pub fn open_orders(&self) -> ExecResult<Vec<ManagedOrder>> {
        Ok(self
            .shared
            .read()?
            .orders
            .values()
            .filter(|m| !m.status.is_terminal())
            .cloned()
            .collect())
    }

    pub fn order_count(&self) -> ExecResult<usize> {
        Ok(self.shared.read()?.orders.len())
    }

    /// Drop every order in a terminal status along with its venue id.
    ///
    /// Fills arriving later for a dropped order are treated as unknown.
    /// Returns how many orders were removed.
    pub fn purge_terminal(&self) -> ExecResult<usize> {
        let mut table = self.shared.write()?;
        let terminal: Vec<OrderId> = table
            .orders
            .values()
            .filter(|m| m.status.is_terminal())
            .map(ManagedOrder::id)
            .collect();

        for order_id in &terminal {
            if let Some(venue_order_id) =
                table.orders.remove(order_id).and_then(|m| m.venue_order_id)
            {
                table.by_venue_id.remove(&venue_order_id);
            }
        }

        if !terminal.is_empty() {
            info!(purged = terminal.len(), remaining = table.orders.len(), "Terminal orders purged");
        }
        Ok(terminal.len())
    }
}

// =============================================================================
// Submission Task
// =============================================================================

/// At most `max_retries + 1` attempts. Only timeouts are retried.
async fn run_submission<V: VenuePort>(
    shared: Arc<Shared<V>>,
    order_id: OrderId,
    order: Order,
) -> ExecResult<OrderStatus> {
    let config = shared.config;
    let mut retries: u32 = 0;

    loop {
        shared.update(order_id, |managed| {
            managed.retries = retries;
            managed.mark_submitted()
        })?;
        debug!(%order_id, attempt = retries + 1, "Sending order to venue");

        let outcome = match tokio::time::timeout(
            config.order_timeout(),
            shared.venue.send_order(&order),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ExecError::Timeout(format!(
                "No venue response within {}ms",
                config.order_timeout_ms()
            ))),
        };

        match outcome {
            Ok(venue_order_id) => {
                info!(%order_id, %venue_order_id, retries, "Order acknowledged");
                shared.acknowledge(order_id, venue_order_id)?;
                return Ok(OrderStatus::Acknowledged);
            },
            Err(e) if e.is_timeout() => {
                if retries >= config.max_retries() {
                    let reason = format!("Retries exhausted after {} attempts: {}", retries + 1, e);
                    error!(%order_id, retries, %reason, "Order rejected");
                    shared.update(order_id, |managed| managed.reject(reason))?;
                    return Ok(OrderStatus::Rejected);
                }

                retries += 1;
                shared.update(order_id, |managed| {
                    managed.retries = retries;
                    Ok(())
                })?;

                let delay = config.backoff(retries);
                warn!(
                    %order_id,
                    retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Venue timeout, retrying"
                );
                tokio::time::sleep(delay).await;
            },
            Err(e) => {
                warn!(%order_id, error = %e, "Order rejected by venue");
                shared.update(order_id, |managed| managed.reject(e.to_string()))?;
                return Ok(OrderStatus::Rejected);
            },
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
