//! Notification listener for the `tasks` channel
//!
//! One background task owns a listening session for the process lifetime.
//! Every notification is fanned out to the local dequeuer registry; delivery
//! is a hint, so dropped or collapsed notifications are harmless.

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgListener;
use sqlx::PgPool;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::dequeuers::Dequeuers;
use super::TASKS_CHANNEL;
use crate::Result;

/// Subscribe to the `tasks` channel and spawn the listen loop.
///
/// The `LISTEN` completes before this returns, so no enqueue committed after
/// queue construction can race ahead of the listener being armed.
pub(crate) async fn start(
    pool: &PgPool,
    dequeuers: Arc<Dequeuers>,
    shutdown: CancellationToken,
    retry_backoff: Duration,
) -> Result<JoinHandle<()>> {
    let mut listener = PgListener::connect_with(pool).await?;
    listener.listen(TASKS_CHANNEL).await?;

    Ok(tokio::spawn(listen_loop(
        listener,
        dequeuers,
        shutdown,
        retry_backoff,
    )))
}

async fn listen_loop(
    mut listener: PgListener,
    dequeuers: Arc<Dequeuers>,
    shutdown: CancellationToken,
    retry_backoff: Duration,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                // Unlisten on the still-healthy session so it returns clean
                // to the pool; the shutdown signal must not interrupt this.
                if let Err(e) = listener.unlisten(TASKS_CHANNEL).await {
                    tracing::error!(error = %e, "Error unlistening from tasks channel");
                }
                tracing::info!("Shutting down the tasks listener");
                return;
            }
            notification = listener.recv() => match notification {
                Ok(_) => {
                    // something happened in the database, wake all dequeuers
                    dequeuers.notify_all();
                }
                Err(e) => {
                    // recv re-establishes the session (and its LISTEN) on the
                    // next call; sleep to avoid log spam while the database
                    // flaps
                    tracing::error!(
                        error = %e,
                        "Error waiting for notification on tasks channel"
                    );
                    tokio::time::sleep(retry_backoff).await;
                }
            }
        }
    }
}
