//! Tag-based response cache.
//!
//! Cached values are registered under one or more tags; invalidating a tag
//! drops every value registered under it. Tracker project data of a team is
//! tagged `tracker_projects_{team_id}`.
//!
//! Every invalidation bumps the tag's generation. A reader takes the
//! generation before loading from the store and fills the cache only if it
//! is unchanged, so a load that raced a write never repopulates stale data.

use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};

/// Cache tag covering all tracker project data of `team_id`.
pub fn cache_tag_for_team(team_id: &str) -> String {
    format!("tracker_projects_{}", team_id)
}

fn tag_set_key(tag: &str) -> String {
    format!("cache-tag:{}", tag)
}

fn tag_generation_key(tag: &str) -> String {
    format!("cache-tag-gen:{}", tag)
}

/// KEYS: value key, tag set, generation. ARGV: value, ttl, expected generation.
const SET_IF_GENERATION: &str = r#"
if tonumber(redis.call('GET', KEYS[3]) or '0') ~= tonumber(ARGV[3]) then
  return 0
end
redis.call('SET', KEYS[1], ARGV[1], 'EX', ARGV[2])
redis.call('SADD', KEYS[2], KEYS[1])
redis.call('EXPIRE', KEYS[2], ARGV[2])
return 1
"#;

/// KEYS: tag set, generation. Returns the number of keys dropped.
const INVALIDATE_TAG: &str = r#"
redis.call('INCR', KEYS[2])
local keys = redis.call('SMEMBERS', KEYS[1])
for _, key in ipairs(keys) do
  redis.call('DEL', key)
end
redis.call('DEL', KEYS[1])
return #keys
"#;

#[async_trait]
pub trait TagCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error>;

    /// Current generation of `tag`; starts at 0 and grows with every
    /// invalidation.
    async fn tag_generation(&self, tag: &str) -> Result<u64, anyhow::Error>;

    /// Store `value` under `key` and register the key under `tag`, provided
    /// the tag is still at `generation`. Returns whether the value was stored.
    async fn set_tagged(
        &self,
        key: &str,
        value: &str,
        tag: &str,
        generation: u64,
        expiry_seconds: u64,
    ) -> Result<bool, anyhow::Error>;

    /// Drop every key registered under `tag` and bump its generation.
    async fn invalidate_tag(&self, tag: &str) -> Result<(), anyhow::Error>;

    async fn health_check(&self) -> Result<(), anyhow::Error>;
}

#[derive(Clone)]
pub struct RedisTagCache {
    _client: Client,
    manager: ConnectionManager,
}

impl RedisTagCache {
    pub async fn new(url: &str) -> Result<Self, anyhow::Error> {
        tracing::info!("Connecting to Redis");
        let client = Client::open(url)?;

        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            anyhow::anyhow!("Failed to connect to Redis: {}", e)
        })?;

        tracing::info!("Successfully connected to Redis");

        Ok(Self {
            _client: client,
            manager,
        })
    }
}

#[async_trait]
impl TagCache for RedisTagCache {
    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to get cache: {}", e))
    }

    async fn tag_generation(&self, tag: &str) -> Result<u64, anyhow::Error> {
        let mut conn = self.manager.clone();
        let generation: Option<u64> = redis::cmd("GET")
            .arg(tag_generation_key(tag))
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read cache tag generation {}: {}", tag, e))?;
        Ok(generation.unwrap_or(0))
    }

    async fn set_tagged(
        &self,
        key: &str,
        value: &str,
        tag: &str,
        generation: u64,
        expiry_seconds: u64,
    ) -> Result<bool, anyhow::Error> {
        let mut conn = self.manager.clone();

        let stored: i64 = redis::cmd("EVAL")
            .arg(SET_IF_GENERATION)
            .arg(3)
            .arg(key)
            .arg(tag_set_key(tag))
            .arg(tag_generation_key(tag))
            .arg(value)
            .arg(expiry_seconds)
            .arg(generation)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to set cache: {}", e))?;
        Ok(stored == 1)
    }

    async fn invalidate_tag(&self, tag: &str) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();

        let dropped: i64 = redis::cmd("EVAL")
            .arg(INVALIDATE_TAG)
            .arg(2)
            .arg(tag_set_key(tag))
            .arg(tag_generation_key(tag))
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to invalidate cache tag {}: {}", tag, e))?;

        tracing::debug!(tag, keys = dropped, "Cache tag invalidated");
        Ok(())
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Redis health check failed: {}", e))
    }
}

/// Process-local cache that records every invalidation it receives.
#[derive(Default)]
pub struct InMemoryTagCache {
    values: Mutex<HashMap<String, String>>,
    tags: Mutex<HashMap<String, HashSet<String>>>,
    generations: Mutex<HashMap<String, u64>>,
    invalidations: Mutex<Vec<String>>,
    fail_invalidations: bool,
}

impl InMemoryTagCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache whose invalidations fail after being recorded.
    pub fn failing_invalidations() -> Self {
        Self {
            fail_invalidations: true,
            ..Self::default()
        }
    }

    /// Tags invalidated so far, in order.
    pub fn invalidations(&self) -> Vec<String> {
        self.invalidations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl TagCache for InMemoryTagCache {
    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        Ok(self
            .values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned())
    }

    async fn tag_generation(&self, tag: &str) -> Result<u64, anyhow::Error> {
        Ok(self
            .generations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(tag)
            .copied()
            .unwrap_or(0))
    }

    async fn set_tagged(
        &self,
        key: &str,
        value: &str,
        tag: &str,
        generation: u64,
        _expiry_seconds: u64,
    ) -> Result<bool, anyhow::Error> {
        let generations = self.generations.lock().unwrap_or_else(PoisonError::into_inner);
        if generations.get(tag).copied().unwrap_or(0) != generation {
            return Ok(false);
        }

        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
        self.tags
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(tag.to_string())
            .or_default()
            .insert(key.to_string());
        Ok(true)
    }

    async fn invalidate_tag(&self, tag: &str) -> Result<(), anyhow::Error> {
        self.invalidations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tag.to_string());

        if self.fail_invalidations {
            anyhow::bail!("cache unavailable");
        }

        let mut generations = self.generations.lock().unwrap_or_else(PoisonError::into_inner);
        *generations.entry(tag.to_string()).or_default() += 1;

        let keys = self
            .tags
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(tag)
            .unwrap_or_default();
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        for key in keys {
            values.remove(&key);
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        Ok(())
    }
}
