use tokio::sync::{mpsc, watch};

use super::async_cache::AsyncCache;

/// Producer half of the revoke stream.
///
/// Cheap to clone; hand one to every transport that can announce data
/// changes (message broker consumer, HTTP endpoint, ...).
#[derive(Clone, Debug)]
pub struct RevokeSender {
    tx: mpsc::UnboundedSender<String>,
}

impl RevokeSender {
    /// Queues a revoke key for processing.
    ///
    /// Fire-and-forget: the listener applies it asynchronously. A send after
    /// the listener is gone is dropped; revoking into the void is harmless.
    pub fn send(&self, revoke_key: impl Into<String>) {
        self.tx.send(revoke_key.into()).ok();
    }
}

/// Handle to the spawned revoke consumer loop.
#[derive(Debug)]
pub struct RevokeListenerHandle {
    processed: watch::Receiver<u64>,
    task: tokio::task::JoinHandle<()>,
}

impl RevokeListenerHandle {
    /// Number of revokes fully applied so far.
    pub fn processed(&self) -> u64 {
        *self.processed.borrow()
    }

    /// Waits until at least `count` revokes have been fully applied.
    ///
    /// "Applied" means a subsequent cache read observes the invalidation.
    pub async fn wait_processed(&mut self, count: u64) {
        while *self.processed.borrow_and_update() < count {
            if self.processed.changed().await.is_err() {
                return;
            }
        }
    }

    /// Waits for the consumer loop to finish. It ends once every
    /// [`RevokeSender`] clone is dropped and the queue is drained.
    pub async fn join(self) {
        self.task.await.ok();
    }
}

/// Subscribes `cache` to an inbound stream of revoke keys.
///
/// Every key received on the returned [`RevokeSender`] is fed into
/// [`AsyncCache::revoke`] by a single consumer loop, strictly in arrival
/// order.
pub fn spawn_revoke_listener<T>(cache: AsyncCache<T>) -> (RevokeSender, RevokeListenerHandle)
where
    T: Clone + Send + Sync + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let (processed_tx, processed_rx) = watch::channel(0u64);

    let task = tokio::spawn(async move {
        let mut count = 0u64;
        while let Some(revoke_key) = rx.recv().await {
            cache.revoke(&revoke_key).await;
            count += 1;
            processed_tx.send_replace(count);
        }
        tracing::debug!(count, "revoke stream closed");
    });

    (
        RevokeSender { tx },
        RevokeListenerHandle {
            processed: processed_rx,
            task,
        },
    )
}
