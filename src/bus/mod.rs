/// Account update notifications
///
/// The resolver announces every stored or changed account JWT on a
/// message bus so that connected servers can refresh their view of the
/// account. Delivery is best-effort and never blocks a request.

pub mod local;
pub mod redis_bus;

pub use local::{BusMessage, LocalBus};
pub use redis_bus::RedisBus;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus connection failed: {0}")]
    Connection(String),

    #[error("publish to {subject} failed: {reason}")]
    Publish { subject: String, reason: String },
}

/// Fire-and-forget publisher
#[async_trait]
pub trait NotificationBus: Send + Sync {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), BusError>;
}

/// Subject on which updates to `account` are announced
pub fn account_notification_subject(account: &str) -> String {
    format!("$SYS.ACCOUNT.{}.CLAIMS.UPDATE", account)
}
