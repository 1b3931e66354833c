//! Venue fill pump.
//!
//! Forwards execution reports from a venue's report stream into the
//! lifecycle manager, which matches them to managed orders and hands them to
//! the dispatcher through its fill callback.

use keel_exec::{OrderLifecycleManager, VenueFill, VenuePort};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Spawn a task draining `reports` into `lifecycle`.
///
/// The task ends when the venue drops its sender.
pub fn spawn_fill_pump<V: VenuePort + 'static>(
    mut reports: mpsc::UnboundedReceiver<VenueFill>,
    lifecycle: OrderLifecycleManager<V>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Fill pump started");

        while let Some(report) = reports.recv().await {
            let VenueFill { venue_order_id, fill } = report;
            match lifecycle.on_venue_fill(&venue_order_id, fill) {
                Ok(forwarded) => debug!(%venue_order_id, forwarded, "Venue fill handled"),
                Err(e) => error!(%venue_order_id, error = %e, "Failed to handle venue fill"),
            }
        }

        info!("Fill pump stopped: venue report stream closed");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_domain::{Fill, Order, OrderSide, OrderStatus, Price, Quantity, Symbol};
    use keel_exec::{ExecutionConfig, PaperVenue};
    use rust_decimal_macros::dec;
    use std::sync::{Arc, Mutex};

    fn order() -> Order {
        Order::new(
            Symbol::new("ETHUSDT").unwrap(),
            OrderSide::Buy,
            Quantity::new(dec!(2)).unwrap(),
            Price::new(dec!(3000)).unwrap(),
            "pump",
        )
    }

    #[tokio::test]
    async fn test_pump_matches_fill_to_order() {
        let (venue, reports) = PaperVenue::new();
        let venue = Arc::new(venue);
        let lifecycle = OrderLifecycleManager::new(venue.clone(), ExecutionConfig::default());

        let received: Arc<Mutex<Vec<Fill>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        lifecycle
            .set_fill_callback(Arc::new(move |fill: Fill| sink.lock().unwrap().push(fill)))
            .unwrap();

        let pump = spawn_fill_pump(reports, lifecycle.clone());

        let (order_id, submission) = lifecycle.submit_tracked(order()).unwrap();
        assert_eq!(submission.await.unwrap().unwrap(), OrderStatus::Acknowledged);

        let venue_order_id =
            lifecycle.get_order(order_id).unwrap().unwrap().venue_order_id.unwrap();
        venue.fill_order(&venue_order_id, Price::new(dec!(2999)).unwrap(), dec!(0.5)).unwrap();

        for _ in 0..100 {
            if !received.lock().unwrap().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }

        let fills = received.lock().unwrap().clone();
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].order_id(), order_id);
        assert_eq!(lifecycle.get_status(order_id).unwrap(), Some(OrderStatus::Filled));

        pump.abort();
    }

    #[tokio::test]
    async fn test_pump_ends_when_stream_closes() {
        let (venue, reports) = PaperVenue::new();
        let lifecycle = OrderLifecycleManager::new(Arc::new(venue), ExecutionConfig::default());

        let (sender, receiver) = tokio::sync::mpsc::unbounded_channel::<VenueFill>();
        drop(reports);
        drop(sender);

        tokio::time::timeout(std::time::Duration::from_secs(1), spawn_fill_pump(receiver, lifecycle))
            .await
            .expect("pump should stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_pump_survives_unknown_venue_ids() {
        let (venue, _reports) = PaperVenue::new();
        let lifecycle = OrderLifecycleManager::new(Arc::new(venue), ExecutionConfig::default());
        let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();
        let pump = spawn_fill_pump(receiver, lifecycle);

        let mut o = order();
        o.id = Some(keel_domain::new_order_id());
        let fill = Fill::for_order(o.id.unwrap(), &o, o.price, dec!(0)).unwrap();
        sender.send(VenueFill { venue_order_id: "PAPER-404".to_string(), fill }).unwrap();
        drop(sender);

        tokio::time::timeout(std::time::Duration::from_secs(1), pump)
            .await
            .expect("pump should stop")
            .unwrap();
    }
}
