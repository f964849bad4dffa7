use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use backchannel_types::events::{ChangeEvent, ChangeFilter};

use crate::{ChangeFeed, RealtimeError, Subscription};

/// In-process change feed. Every published event is broadcast to all
/// subscribers, each of which forwards only what its filter matches.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    broadcast_tx: broadcast::Sender<ChangeEvent>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner { broadcast_tx }),
        }
    }

    /// Publish a change to every live subscriber.
    pub fn publish(&self, event: ChangeEvent) {
        debug!(table = %event.table, kind = event.kind.as_str(), "Publishing change");
        let _ = self.inner.broadcast_tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.broadcast_tx.receiver_count()
    }

    /// Register a filtered subscription. Must be called inside a tokio runtime.
    pub fn register(&self, filter: ChangeFilter) -> Subscription {
        let mut broadcast_rx = self.inner.broadcast_tx.subscribe();
        let (tx, rx) = mpsc::unbounded_channel();
        let task_filter = filter.clone();

        let forward = tokio::spawn(async move {
            loop {
                let event = match broadcast_rx.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Change subscriber lagged by {} events", n);
                        continue;
                    }
                    Err(_) => break,
                };

                if !task_filter.matches(&event) {
                    continue;
                }
                if tx.send(event).is_err() {
                    break;
                }
            }
        });

        Subscription::new(filter, rx, move || forward.abort())
    }
}

#[async_trait]
impl ChangeFeed for Dispatcher {
    async fn subscribe(&self, filter: ChangeFilter) -> Result<Subscription, RealtimeError> {
        Ok(self.register(filter))
    }
}
