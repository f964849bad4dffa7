//! Live change feed: owned subscription handles over either an in-process
//! dispatcher or the provider's realtime websocket.

pub mod connection;
pub mod dispatcher;
pub mod protocol;
pub mod subscription;

use async_trait::async_trait;
use thiserror::Error;

use backchannel_types::events::ChangeFilter;

pub use connection::RealtimeClient;
pub use dispatcher::Dispatcher;
pub use subscription::Subscription;

#[derive(Debug, Error)]
pub enum RealtimeError {
    #[error("Invalid realtime URL: {0}")]
    InvalidUrl(String),

    #[error("Websocket error: {0}")]
    Websocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Realtime connection closed")]
    Closed,

    #[error("Subscription to {topic} rejected: {reason}")]
    Rejected { topic: String, reason: String },
}

/// Anything that can hand out change subscriptions.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn subscribe(&self, filter: ChangeFilter) -> Result<Subscription, RealtimeError>;
}
