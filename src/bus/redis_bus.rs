/// Redis pub/sub notification bus
use crate::bus::{BusError, NotificationBus};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tracing::{debug, error, info, warn};

/// Publishes notifications with Redis PUBLISH
#[derive(Clone)]
pub struct RedisBus {
    connection: ConnectionManager,
}

impl RedisBus {
    /// Connect to the Redis server at `redis_url`
    pub async fn connect(redis_url: &str) -> Result<Self, BusError> {
        info!("Connecting to Redis at {}", redis_url);

        let client = Client::open(redis_url).map_err(|e| {
            error!("Failed to create Redis client: {}", e);
            BusError::Connection(e.to_string())
        })?;

        let connection = ConnectionManager::new(client).await.map_err(|e| {
            error!("Failed to connect to Redis: {}", e);
            BusError::Connection(e.to_string())
        })?;

        info!("✓ Redis notification bus connected");

        Ok(Self { connection })
    }
}

#[async_trait]
impl NotificationBus for RedisBus {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), BusError> {
        let mut conn = self.connection.clone();
        let receivers: i64 = conn.publish(subject, payload).await.map_err(|e| {
            warn!("Redis PUBLISH failed for {}: {}", subject, e);
            BusError::Publish {
                subject: subject.to_string(),
                reason: e.to_string(),
            }
        })?;
        debug!("Published {} to {} Redis subscribers", subject, receivers);
        Ok(())
    }
}
