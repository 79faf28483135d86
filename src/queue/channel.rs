//! Host-owned slot for the queue of one telemetry channel.
//!
//! The host creates a `DeliveryChannel` during setup, installs a queue into
//! it, and hands the channel (or queue handles taken from it) to producers.
//! Nothing here is process-global.

use crate::queue::delivery::{DeliveryConfig, DeliveryQueue};
use crate::queue::transport::Transport;
use parking_lot::RwLock;
use std::time::Duration;

/// Holds the current queue of a telemetry channel, if one was created.
pub struct DeliveryChannel<T> {
    current: RwLock<Option<DeliveryQueue<T>>>,
}

impl<T> Default for DeliveryChannel<T> {
    fn default() -> Self {
        Self {
            current: RwLock::new(None),
        }
    }
}

impl<T: Transport + 'static> DeliveryChannel<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a queue for this channel and make it current.
    pub fn initialize(&self, transport: T, config: DeliveryConfig) -> DeliveryQueue<T> {
        self.install(DeliveryQueue::new(transport, config))
    }

    /// Make an already built queue current. Returns a handle to it.
    ///
    /// A previously installed queue is released; its handles keep working.
    pub fn install(&self, queue: DeliveryQueue<T>) -> DeliveryQueue<T> {
        let previous = self.current.write().replace(queue.clone());
        if let Some(previous) = previous {
            tracing::warn!(
                pending = previous.queue_size(),
                "Replacing the delivery queue of an initialized channel"
            );
        }
        queue
    }

    /// Handle to the current queue.
    pub fn current(&self) -> Option<DeliveryQueue<T>> {
        self.current.read().clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.current.read().is_some()
    }

    /// Release the current queue without waiting for it.
    pub fn teardown(&self) -> Option<DeliveryQueue<T>> {
        self.current.write().take()
    }

    /// Wait for the current queue to empty, then release it.
    pub async fn drain(&self, poll: Duration) -> Option<DeliveryQueue<T>> {
        let queue = self.current()?;
        queue.wait_until_empty(poll).await;
        self.teardown()
    }
}
