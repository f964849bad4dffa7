use tokio::sync::mpsc;

use backchannel_types::events::{ChangeEvent, ChangeFilter};

type Release = Box<dyn FnOnce() + Send + 'static>;

/// Owned handle to one live subscription. The feed registration is released
/// when the handle is dropped or `unsubscribe` is called.
pub struct Subscription {
    filter: ChangeFilter,
    rx: mpsc::UnboundedReceiver<ChangeEvent>,
    release: Option<Release>,
}

impl Subscription {
    pub fn new(
        filter: ChangeFilter,
        rx: mpsc::UnboundedReceiver<ChangeEvent>,
        release: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            filter,
            rx,
            release: Some(Box::new(release)),
        }
    }

    pub fn filter(&self) -> &ChangeFilter {
        &self.filter
    }

    /// Next matching event, or `None` once the feed has gone away.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ChangeEvent> {
        self.rx.try_recv().ok()
    }

    pub fn unsubscribe(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
        self.rx.close();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("filter", &self.filter)
            .field("released", &self.release.is_none())
            .finish()
    }
}
