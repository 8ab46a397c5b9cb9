use async_trait::async_trait;
use redis::{AsyncCommands, Client};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::drivers::NamespacedDriver;
use crate::error::{CacheError, CacheResult};
use crate::traits::CacheDriver;

/// Configuration for Redis driver
#[derive(Debug, Clone)]
pub struct RedisDriverConfig {
    /// Redis connection URL
    pub url: String,
    /// Key prefix for namespacing
    pub prefix: Option<String>,
    /// Default physical TTL for entries
    pub default_ttl: Option<Duration>,
    /// Connection timeout
    pub connect_timeout: Duration,
}

impl Default for RedisDriverConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            prefix: None,
            default_ttl: None,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Shared L2 driver over Redis. Records are bincode-encoded; physical TTLs map
/// onto Redis key expiry.
pub struct RedisDriver<V> {
    client: Client,
    connection: Arc<RwLock<Option<redis::aio::Connection>>>,
    config: RedisDriverConfig,
    _phantom: std::marker::PhantomData<fn() -> V>,
}

impl<V> Clone for RedisDriver<V> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            connection: Arc::clone(&self.connection),
            config: self.config.clone(),
            _phantom: std::marker::PhantomData,
        }
    }
}

impl<V> RedisDriver<V>
where
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub async fn new(config: RedisDriverConfig) -> CacheResult<Self> {
        let client = Client::open(config.url.as_str()).map_err(CacheError::Redis)?;

        let mut conn = client
            .get_async_connection()
            .await
            .map_err(CacheError::Redis)?;

        // Test connection with a simple command
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(CacheError::Redis)?;

        Ok(Self {
            client,
            connection: Arc::new(RwLock::new(Some(conn))),
            config,
            _phantom: std::marker::PhantomData,
        })
    }

    /// Take the pooled connection, or open a fresh one
    async fn get_connection(&self) -> CacheResult<redis::aio::Connection> {
        let mut conn_guard = self.connection.write().await;

        if let Some(conn) = conn_guard.take() {
            Ok(conn)
        } else {
            self.client
                .get_async_connection()
                .await
                .map_err(CacheError::Redis)
        }
    }

    async fn return_connection(&self, conn: redis::aio::Connection) {
        let mut conn_guard = self.connection.write().await;
        *conn_guard = Some(conn);
    }

    /// Build the full key with prefix
    fn build_key(&self, key: &str) -> String {
        if let Some(prefix) = &self.config.prefix {
            format!("{}:{}", prefix, key)
        } else {
            key.to_string()
        }
    }

    fn encode(&self, value: &V) -> CacheResult<Vec<u8>> {
        bincode::serde::encode_to_vec(value, bincode::config::standard()).map_err(|e| {
            CacheError::Generic {
                message: format!("Serialization failed: {}", e),
            }
        })
    }

    fn decode(&self, data: &[u8]) -> CacheResult<V> {
        bincode::serde::decode_from_slice(data, bincode::config::standard())
            .map(|(value, _)| value)
            .map_err(|e| CacheError::Generic {
                message: format!("Deserialization failed: {}", e),
            })
    }
}

#[async_trait]
impl<V> CacheDriver for RedisDriver<V>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    type Value = V;

    async fn get(&self, key: &str) -> CacheResult<Option<Self::Value>> {
        let mut conn = self.get_connection().await?;
        let full_key = self.build_key(key);

        let result: Option<Vec<u8>> = conn.get(&full_key).await.map_err(CacheError::Redis)?;

        self.return_connection(conn).await;

        match result {
            Some(data) => Ok(Some(self.decode(&data)?)),
            None => Ok(None),
        }
    }

    async fn pull(&self, key: &str) -> CacheResult<Option<Self::Value>> {
        let mut conn = self.get_connection().await?;
        let full_key = self.build_key(key);

        let result: Option<Vec<u8>> = redis::cmd("GETDEL")
            .arg(&full_key)
            .query_async(&mut conn)
            .await
            .map_err(CacheError::Redis)?;

        self.return_connection(conn).await;

        match result {
            Some(data) => Ok(Some(self.decode(&data)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Self::Value, ttl: Option<Duration>) -> CacheResult<bool> {
        let full_key = self.build_key(key);
        let ttl = ttl.or(self.config.default_ttl);
        let serialized = self.encode(&value)?;

        let mut conn = self.get_connection().await?;

        let mut cmd = redis::cmd("SET");
        cmd.arg(&full_key).arg(serialized);
        if let Some(ttl) = ttl {
            // Redis rejects EX 0; a sub-second ttl still has to expire
            cmd.arg("EX").arg(ttl.as_secs().max(1));
        }
        let _: () = cmd.query_async(&mut conn).await.map_err(CacheError::Redis)?;

        self.return_connection(conn).await;
        Ok(true)
    }

    async fn has(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.get_connection().await?;
        let full_key = self.build_key(key);

        let exists: bool = conn.exists(&full_key).await.map_err(CacheError::Redis)?;

        self.return_connection(conn).await;
        Ok(exists)
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.get_connection().await?;
        let full_key = self.build_key(key);

        let deleted: u32 = conn.del(&full_key).await.map_err(CacheError::Redis)?;

        self.return_connection(conn).await;
        Ok(deleted > 0)
    }

    async fn delete_many(&self, keys: &[&str]) -> CacheResult<bool> {
        if keys.is_empty() {
            return Ok(false);
        }

        let mut conn = self.get_connection().await?;
        let full_keys: Vec<String> = keys.iter().map(|k| self.build_key(k)).collect();

        let deleted: u64 = conn.del(&full_keys).await.map_err(CacheError::Redis)?;

        self.return_connection(conn).await;
        Ok(deleted > 0)
    }

    async fn clear(&self) -> CacheResult<()> {
        let mut conn = self.get_connection().await?;

        if let Some(prefix) = &self.config.prefix {
            // Delete all keys with prefix
            let pattern = format!("{}:*", prefix);
            let keys: Vec<String> = conn.keys(&pattern).await.map_err(CacheError::Redis)?;

            if !keys.is_empty() {
                let _: u64 = conn.del(&keys).await.map_err(CacheError::Redis)?;
            }
        } else {
            // Flush entire database (dangerous!)
            let _: () = redis::cmd("FLUSHDB")
                .query_async(&mut conn)
                .await
                .map_err(CacheError::Redis)?;
        }

        self.return_connection(conn).await;
        Ok(())
    }

    async fn disconnect(&self) -> CacheResult<()> {
        self.connection.write().await.take();
        Ok(())
    }

    fn namespace(&self, prefix: &str) -> Arc<dyn CacheDriver<Value = Self::Value>> {
        Arc::new(NamespacedDriver::new(Arc::new(self.clone()), prefix))
    }
}

/// Builder for Redis driver
pub struct RedisDriverBuilder {
    config: RedisDriverConfig,
}

impl RedisDriverBuilder {
    pub fn new() -> Self {
        Self {
            config: RedisDriverConfig::default(),
        }
    }

    pub fn url<S: Into<String>>(mut self, url: S) -> Self {
        self.config.url = url.into();
        self
    }

    pub fn prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.config.prefix = Some(prefix.into());
        self
    }

    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.config.default_ttl = Some(ttl);
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub async fn build<V>(self) -> CacheResult<RedisDriver<V>>
    where
        V: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        RedisDriver::new(self.config).await
    }
}

impl Default for RedisDriverBuilder {
    fn default() -> Self {
        Self::new()
    }
}
