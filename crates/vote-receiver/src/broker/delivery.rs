use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Final result of an asynchronous hand-off as reported by the producer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryEvent {
    pub handle: usize,
    pub outcome: DeliveryOutcome,
}

/// Sending half handed to every producer handle. Reporting never blocks.
#[derive(Debug, Clone)]
pub struct DeliveryReporter {
    sender: mpsc::UnboundedSender<DeliveryEvent>,
}

impl DeliveryReporter {
    pub fn channel() -> (Self, DeliveryEvents) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, DeliveryEvents { receiver })
    }

    pub fn report(&self, event: DeliveryEvent) {
        if self.sender.send(event).is_err() {
            debug!("delivery listener stopped; dropping delivery event");
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliverySummary {
    pub delivered: u64,
    pub failed: u64,
}

#[derive(Debug)]
pub struct DeliveryEvents {
    receiver: mpsc::UnboundedReceiver<DeliveryEvent>,
}

impl DeliveryEvents {
    /// Logs and counts events until every reporter is dropped.
    pub async fn drain(mut self) -> DeliverySummary {
        let mut summary = DeliverySummary::default();

        while let Some(event) = self.receiver.recv().await {
            match event.outcome {
                DeliveryOutcome::Delivered => {
                    summary.delivered += 1;
                    metrics::counter!("vote_deliveries_total", "result" => "delivered")
                        .increment(1);
                    debug!(handle = event.handle, "vote delivered to broker");
                }
                DeliveryOutcome::Failed(reason) => {
                    summary.failed += 1;
                    metrics::counter!("vote_deliveries_total", "result" => "failed").increment(1);
                    warn!(handle = event.handle, %reason, "vote delivery failed");
                }
            }
        }

        info!(
            delivered = summary.delivered,
            failed = summary.failed,
            "delivery listener finished"
        );
        summary
    }
}

/// Starts the delivery listener on the current runtime.
pub fn spawn_delivery_listener() -> (DeliveryReporter, JoinHandle<DeliverySummary>) {
    let (reporter, events) = DeliveryReporter::channel();
    (reporter, tokio::spawn(events.drain()))
}
