//! Redis-backed idempotency service
//!
//! Duplicate suppression for event ingestion: a processed-marker per
//! `(tenant, source, event_id)` with a 24h TTL, plus a short exclusive lock
//! that keeps two instances from processing the same event concurrently.
//!
//! The Redis connection is initialized lazily on first use so the service can
//! be constructed without the dependency being up.

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::error::AppError;

pub const PROCESSED_TTL_SECONDS: u64 = 86_400;
pub const LOCK_TTL_SECONDS: u64 = 5;

/// Service for handling idempotent event processing with Redis
pub struct IdempotencyService {
    client: redis::Client,
    conn: OnceCell<ConnectionManager>,
}

impl IdempotencyService {
    /// Build the service. Does not connect; connection happens on first use.
    pub fn new(redis_url: &str) -> Result<Self, AppError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| AppError::Dependency(format!("redis url: {e}")))?;

        Ok(Self {
            client,
            conn: OnceCell::new(),
        })
    }

    async fn connection(&self) -> Result<ConnectionManager, AppError> {
        let conn = self
            .conn
            .get_or_try_init(|| async {
                ConnectionManager::new(self.client.clone())
                    .await
                    .map_err(AppError::from)
            })
            .await?;
        Ok(conn.clone())
    }

    fn idempotency_key(tenant: &str, source: &str, event_id: &str) -> String {
        format!("idempo:{tenant}:{source}:{event_id}")
    }

    fn lock_key(tenant: &str, source: &str, event_id: &str) -> String {
        format!("lock:{}", Self::idempotency_key(tenant, source, event_id))
    }

    /// Acquire the short exclusive processing lock (SET NX EX).
    ///
    /// Returns false when another worker currently holds the lock.
    pub async fn acquire_lock(
        &self,
        tenant: &str,
        source: &str,
        event_id: &str,
    ) -> Result<bool, AppError> {
        let mut conn = self.connection().await?;
        let key = Self::lock_key(tenant, source, event_id);

        // SET NX EX: acquired iff the reply is OK (nil when already held).
        let reply: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(LOCK_TTL_SECONDS)
            .query_async(&mut conn)
            .await?;

        let acquired = reply.is_some();
        debug!(tenant, source, event_id, acquired, "idempotency lock attempt");
        Ok(acquired)
    }

    /// Release the processing lock.
    pub async fn release_lock(
        &self,
        tenant: &str,
        source: &str,
        event_id: &str,
    ) -> Result<(), AppError> {
        let mut conn = self.connection().await?;
        let key = Self::lock_key(tenant, source, event_id);
        let _: () = conn.del(&key).await?;
        Ok(())
    }

    /// Whether the event already carries a processed-marker.
    pub async fn is_processed(
        &self,
        tenant: &str,
        source: &str,
        event_id: &str,
    ) -> Result<bool, AppError> {
        let mut conn = self.connection().await?;
        let key = Self::idempotency_key(tenant, source, event_id);
        let exists: bool = conn.exists(&key).await?;
        Ok(exists)
    }

    /// Mark the event processed with the standard 24h TTL.
    pub async fn mark_processed(
        &self,
        tenant: &str,
        source: &str,
        event_id: &str,
    ) -> Result<(), AppError> {
        let mut conn = self.connection().await?;
        let key = Self::idempotency_key(tenant, source, event_id);
        let _: () = conn.set_ex(&key, "1", PROCESSED_TTL_SECONDS).await?;
        Ok(())
    }

    /// Round-trip used by the health probe.
    pub async fn ping(&self) -> Result<(), AppError> {
        let mut conn = self.connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
