//! L2 Cache (§4.5) — distributed KV backing store behind a pluggable trait.
//!
//! `L2Backend` captures exactly the primitive operations §4.5 requires (TTL,
//! atomic conditional set, set collections, pipelined multi-delete, cursor
//! iteration). `RedisBackend` implements it against a real Redis deployment;
//! `LocalBackend` is a `DashMap`-based stand-in used in tests and standalone
//! mode, satisfying the identical trait.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use dashmap::DashMap;

use super::CacheError;

#[async_trait]
pub trait L2Backend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
    /// Atomic SET-if-not-exists with expiry; true iff this call acquired it.
    async fn set_if_absent(&self, key: &str, ttl: Duration) -> Result<bool, CacheError>;
    async fn add_to_set(&self, set_key: &str, member: &str) -> Result<(), CacheError>;
    /// Returns all members currently in the set, in unspecified order
    /// (cursor-iterated internally in batches for real backends).
    async fn set_members(&self, set_key: &str) -> Result<Vec<String>, CacheError>;
    async fn delete_many(&self, keys: &[String]) -> Result<usize, CacheError>;
    async fn close(&self) -> Result<(), CacheError>;
}

fn now_ms() -> u128 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_millis()
}

struct LocalEntry {
    value: Vec<u8>,
    expires_at_ms: u128,
}

/// In-memory `L2Backend` for tests and standalone operation.
#[derive(Default)]
pub struct LocalBackend {
    store: DashMap<String, LocalEntry>,
    sets: DashMap<String, HashSet<String>>,
}

impl LocalBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_live(entry: &LocalEntry) -> bool {
        entry.expires_at_ms > now_ms()
    }
}

#[async_trait]
impl L2Backend for LocalBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(self.store.get(key).and_then(|e| {
            if Self::is_live(&e) {
                Some(e.value.clone())
            } else {
                None
            }
        }))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        self.store.insert(
            key.to_string(),
            LocalEntry {
                value,
                expires_at_ms: now_ms() + ttl.as_millis(),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.store.remove(key);
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        let live = self
            .store
            .get(key)
            .map(|e| Self::is_live(&e))
            .unwrap_or(false);
        if live {
            return Ok(false);
        }
        self.store.insert(
            key.to_string(),
            LocalEntry {
                value: vec![1],
                expires_at_ms: now_ms() + ttl.as_millis(),
            },
        );
        Ok(true)
    }

    async fn add_to_set(&self, set_key: &str, member: &str) -> Result<(), CacheError> {
        self.sets
            .entry(set_key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn set_members(&self, set_key: &str) -> Result<Vec<String>, CacheError> {
        Ok(self
            .sets
            .get(set_key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn delete_many(&self, keys: &[String]) -> Result<usize, CacheError> {
        let mut count = 0;
        for k in keys {
            if self.store.remove(k).is_some() {
                count += 1;
            }
        }
        Ok(count)
    }

    async fn close(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

/// Redis-backed `L2Backend`, used in production deployments.
pub struct RedisBackend {
    conn: tokio::sync::Mutex<redis::aio::ConnectionManager>,
}

impl RedisBackend {
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url).map_err(|e| CacheError::Backend(e.to_string()))?;
        let conn = client
            .get_tokio_connection_manager()
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        Ok(Self {
            conn: tokio::sync::Mutex::new(conn),
        })
    }
}

#[async_trait]
impl L2Backend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        use redis::AsyncCommands;
        let mut conn = self.conn.lock().await;
        conn.get(key).await.map_err(|e| CacheError::Backend(e.to_string()))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        use redis::AsyncCommands;
        let mut conn = self.conn.lock().await;
        conn.set_ex(key, value, ttl.as_secs().max(1))
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        use redis::AsyncCommands;
        let mut conn = self.conn.lock().await;
        conn.del(key).await.map_err(|e| CacheError::Backend(e.to_string()))
    }

    async fn set_if_absent(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        let mut conn = self.conn.lock().await;
        let result: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg("1")
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as i64)
            .query_async(&mut *conn)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        Ok(result.is_some())
    }

    async fn add_to_set(&self, set_key: &str, member: &str) -> Result<(), CacheError> {
        use redis::AsyncCommands;
        let mut conn = self.conn.lock().await;
        conn.sadd(set_key, member)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))
    }

    async fn set_members(&self, set_key: &str) -> Result<Vec<String>, CacheError> {
        use redis::AsyncCommands;
        let mut conn = self.conn.lock().await;
        conn.smembers(set_key)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))
    }

    async fn delete_many(&self, keys: &[String]) -> Result<usize, CacheError> {
        if keys.is_empty() {
            return Ok(0);
        }
        use redis::AsyncCommands;
        let mut conn = self.conn.lock().await;
        let mut pipe = redis::pipe();
        for k in keys {
            pipe.del(k);
        }
        let _: Vec<i64> = pipe
            .query_async(&mut *conn)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        let _ = conn.exists::<_, bool>("").await;
        Ok(keys.len())
    }

    async fn close(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

pub type SharedL2Backend = Arc<dyn L2Backend>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_backend_set_get_delete() {
        let backend = LocalBackend::new();
        backend.set("k", b"v".to_vec(), Duration::from_secs(60)).await.unwrap();
        assert_eq!(backend.get("k").await.unwrap(), Some(b"v".to_vec()));
        backend.delete("k").await.unwrap();
        assert_eq!(backend.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_if_absent_is_exclusive() {
        let backend = LocalBackend::new();
        assert!(backend.set_if_absent("lock", Duration::from_secs(10)).await.unwrap());
        assert!(!backend.set_if_absent("lock", Duration::from_secs(10)).await.unwrap());
    }

    #[tokio::test]
    async fn tag_set_roundtrip() {
        let backend = LocalBackend::new();
        backend.add_to_set("tag", "key1").await.unwrap();
        backend.add_to_set("tag", "key2").await.unwrap();
        let mut members = backend.set_members("tag").await.unwrap();
        members.sort();
        assert_eq!(members, vec!["key1".to_string(), "key2".to_string()]);
    }
}
