/// In-process notification bus
use crate::bus::{BusError, NotificationBus};
use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::debug;

const DEFAULT_CAPACITY: usize = 1024;

/// A notification as seen by subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub subject: String,
    pub payload: Vec<u8>,
}

/// Broadcasts notifications to every subscriber in this process
#[derive(Clone)]
pub struct LocalBus {
    sender: broadcast::Sender<BusMessage>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Receive every message published after this call
    pub fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.sender.subscribe()
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationBus for LocalBus {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), BusError> {
        let message = BusMessage {
            subject: subject.to_string(),
            payload,
        };
        // No subscribers is not a failure
        let receivers = self.sender.send(message).unwrap_or(0);
        debug!("Published {} to {} local subscribers", subject, receivers);
        Ok(())
    }
}
