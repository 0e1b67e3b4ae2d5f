//! Remote cache backend over Redis.
//!
//! Entries are stored as self-describing JSON under a namespaced key, with
//! expiry delegated to Redis via `SET EX`. Backend failures surface as
//! [`CacheError`] and the executor degrades them to misses, so a Redis outage
//! slows nothing down beyond the lost hits.

use modelmux_core::cache::{CacheEntry, CacheError, ResponseCache};
use redis::AsyncCommands;

const KEY_PREFIX: &str = "modelmux:response:";

pub struct RedisCache {
    client: redis::Client,
}

fn backend_error(err: impl std::fmt::Display) -> CacheError {
    CacheError::Backend {
        message: err.to_string(),
    }
}

impl RedisCache {
    pub fn new(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url).map_err(backend_error)?;
        Ok(Self { client })
    }

    fn prefixed(key: &str) -> String {
        format!("{KEY_PREFIX}{key}")
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, CacheError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(backend_error)
    }
}

#[async_trait::async_trait]
impl ResponseCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let mut conn = self.connection().await?;
        let raw: Option<String> = conn.get(Self::prefixed(key)).await.map_err(backend_error)?;
        let Some(raw) = raw else {
            return Ok(None);
        };

        let entry: CacheEntry = serde_json::from_str(&raw).map_err(backend_error)?;
        // Redis owns expiry, but a clock-skewed entry is still honored here.
        if entry.is_expired() {
            let _: () = conn
                .del(Self::prefixed(key))
                .await
                .map_err(backend_error)?;
            return Ok(None);
        }
        Ok(Some(entry))
    }

    async fn set(&self, key: &str, entry: CacheEntry) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        let prefixed = Self::prefixed(key);

        // Keep the newest entry when concurrent misses race on the same key.
        let existing: Option<String> = conn.get(&prefixed).await.map_err(backend_error)?;
        if let Some(existing) = existing {
            if let Ok(existing) = serde_json::from_str::<CacheEntry>(&existing) {
                if existing.created_at > entry.created_at {
                    return Ok(());
                }
            }
        }

        let encoded = serde_json::to_string(&entry).map_err(backend_error)?;
        let ttl_secs = entry.ttl.as_secs().max(1);
        let _: () = conn
            .set_ex(prefixed, encoded, ttl_secs)
            .await
            .map_err(backend_error)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        let _: () = conn
            .del(Self::prefixed(key))
            .await
            .map_err(backend_error)?;
        Ok(())
    }

    async fn len(&self) -> usize {
        // Best effort; a failed backend reports an empty cache.
        match self.connection().await {
            Ok(mut conn) => redis::cmd("DBSIZE")
                .query_async::<_, i64>(&mut conn)
                .await
                .map(|n| n.max(0) as usize)
                .unwrap_or(0),
            Err(_) => 0,
        }
    }
}
