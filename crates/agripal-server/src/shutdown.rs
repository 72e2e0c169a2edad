//! Ordered shutdown of the broker link and the live hub.

use crate::hub::DistributionHub;
use std::future::Future;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Resolves once `signal` fires and the broker link and hub are closed.
///
/// The link is cancelled and awaited before the hub closes, so no reading
/// is published after live clients have been sent their close. Pass this to
/// `axum::serve(..).with_graceful_shutdown`; axum stops accepting and drains
/// in-flight requests after it resolves.
pub async fn drain<S>(
    signal: S,
    shutdown: CancellationToken,
    broker_task: JoinHandle<()>,
    hub: DistributionHub,
) where
    S: Future<Output = ()>,
{
    signal.await;

    shutdown.cancel();
    if let Err(e) = broker_task.await {
        tracing::error!("broker link task failed: {}", e);
    }
    hub.close();
    tracing::info!("live hub closed");
}
