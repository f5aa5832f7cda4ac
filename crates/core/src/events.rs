use tokio::sync::broadcast;
use tracing::debug;

use crate::models::event::PortfolioEvent;

/// Buffered events per subscriber before the slowest one starts lagging.
const CHANNEL_CAPACITY: usize = 64;

/// Typed publish/subscribe channel for [`PortfolioEvent`]s.
///
/// Cheap to clone; every clone publishes into the same channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PortfolioEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish an event. Returns the number of subscribers that received it;
    /// publishing with nobody listening is not an error.
    pub fn publish(&self, event: PortfolioEvent) -> usize {
        debug!(?event, "publishing portfolio event");
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PortfolioEvent> {
        self.tx.subscribe()
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
