//! Moves decoded samples from the broker link into the hub.

use agripal_broker::Ingested;
use tokio::sync::mpsc;

use crate::hub::DistributionHub;

/// Publishes every queued sample, in arrival order, until the broker link
/// drops its sender.
pub async fn run(mut rx: mpsc::Receiver<Ingested>, hub: DistributionHub) {
    tracing::info!("ingest pipeline started");
    let mut ingested: u64 = 0;

    while let Some(Ingested { topic, sample }) = rx.recv().await {
        let reading = hub.publish(&topic, sample);
        ingested += 1;
        tracing::debug!(
            topic = %topic,
            sensor = %reading.key(),
            "ingested reading"
        );
    }

    tracing::info!(ingested, "ingest pipeline drained");
}
