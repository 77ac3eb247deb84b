use crate::{domain::RenderCache, errors::CacheError};
use anyhow::Context;
use async_trait::async_trait;
use redis::{AsyncCommands, Client, aio::ConnectionManager};
use std::{collections::HashMap, time::Duration};
use tokio::{sync::Mutex, time::Instant};
use uuid::Uuid;

/// Redis EX takes whole seconds; a sub-second TTL would otherwise become 0.
fn ttl_seconds(ttl: Duration) -> u64 {
    let secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
    secs.max(1)
}

/// Rendered text in Redis, one string key per post.
#[derive(Clone)]
pub struct RedisRenderCache {
    connection: ConnectionManager,
}

impl RedisRenderCache {
    pub async fn connect(redis_url: &str) -> Result<Self, CacheError> {
        let client = Client::open(redis_url)
            .with_context(|| format!("Redis: invalid connection URL '{}'", redis_url))?;
        let connection = client
            .get_connection_manager()
            .await
            .with_context(|| format!("Redis: failed to connect to '{}'", redis_url))?;
        tracing::info!(%redis_url, "Connected render cache to Redis");
        Ok(Self { connection })
    }
}

#[async_trait]
impl RenderCache for RedisRenderCache {
    async fn put(&self, id: Uuid, rendered: String, ttl: Duration) -> Result<String, CacheError> {
        let mut conn = self.connection.clone();
        let _: () = conn
            .set_ex(id.to_string(), &rendered, ttl_seconds(ttl))
            .await
            .with_context(|| format!("Redis: SET failed for post {}", id))?;
        Ok(rendered)
    }

    async fn get(&self, id: Uuid) -> Result<Option<String>, CacheError> {
        let mut conn = self.connection.clone();
        let value: Option<String> = conn
            .get(id.to_string())
            .await
            .with_context(|| format!("Redis: GET failed for post {}", id))?;
        Ok(value)
    }
}

/// In-process cache. Expired entries are dropped on read and swept on every write.
#[derive(Debug, Default)]
pub struct MemoryRenderCache {
    /// `None` expiry means the TTL is too long to represent and never lapses.
    entries: Mutex<HashMap<Uuid, (String, Option<Instant>)>>,
}

impl MemoryRenderCache {
    pub fn new() -> Self {
        Self::default()
    }
}

fn is_live(expires_at: Option<Instant>, now: Instant) -> bool {
    expires_at.is_none_or(|deadline| now < deadline)
}

#[async_trait]
impl RenderCache for MemoryRenderCache {
    async fn put(&self, id: Uuid, rendered: String, ttl: Duration) -> Result<String, CacheError> {
        let now = Instant::now();
        let expires_at = now.checked_add(ttl);
        let mut entries = self.entries.lock().await;
        entries.retain(|_, (_, deadline)| is_live(*deadline, now));
        entries.insert(id, (rendered.clone(), expires_at));
        Ok(rendered)
    }

    async fn get(&self, id: Uuid) -> Result<Option<String>, CacheError> {
        let mut entries = self.entries.lock().await;
        match entries.get(&id) {
            Some((value, expires_at)) if is_live(*expires_at, Instant::now()) => Ok(Some(value.clone())),
            Some(_) => {
                entries.remove(&id);
                Ok(None)
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_rounds_up_to_whole_seconds() {
        assert_eq!(ttl_seconds(Duration::from_secs(60)), 60);
        assert_eq!(ttl_seconds(Duration::from_millis(1500)), 2);
        assert_eq!(ttl_seconds(Duration::from_millis(10)), 1);
        assert_eq!(ttl_seconds(Duration::ZERO), 1);
    }

    #[tokio::test]
    async fn miss_is_distinct_from_error() {
        let cache = MemoryRenderCache::new();
        assert_eq!(cache.get(Uuid::new_v4()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn put_returns_stored_value() {
        let cache = MemoryRenderCache::new();
        let id = Uuid::new_v4();
        let stored = cache.put(id, "art".into(), Duration::from_secs(60)).await.unwrap();
        assert_eq!(stored, "art");
        assert_eq!(cache.get(id).await.unwrap().as_deref(), Some("art"));
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let cache = MemoryRenderCache::new();
        let id = Uuid::new_v4();
        cache.put(id, "art".into(), Duration::from_secs(60)).await.unwrap();

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(cache.get(id).await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get(id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn unrepresentable_ttl_never_expires() {
        let cache = MemoryRenderCache::new();
        let id = Uuid::new_v4();
        cache.put(id, "art".into(), Duration::MAX).await.unwrap();
        cache
            .put(Uuid::new_v4(), "more".into(), Duration::from_secs(u64::MAX))
            .await
            .unwrap();
        assert_eq!(cache.get(id).await.unwrap().as_deref(), Some("art"));
    }

    #[tokio::test(start_paused = true)]
    async fn writes_sweep_expired_entries() {
        let cache = MemoryRenderCache::new();
        for _ in 0..3 {
            cache.put(Uuid::new_v4(), "old".into(), Duration::from_secs(1)).await.unwrap();
        }
        let kept = Uuid::new_v4();
        cache.put(kept, "kept".into(), Duration::from_secs(60)).await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        cache.put(Uuid::new_v4(), "new".into(), Duration::from_secs(60)).await.unwrap();

        let entries = cache.entries.lock().await;
        assert_eq!(entries.len(), 2);
        assert!(entries.contains_key(&kept));
    }
}
