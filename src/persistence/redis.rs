//! Redis-backed key-value store

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use super::KeyValueStore;
use crate::error::{OrchestratorError, Result};

pub struct RedisStore {
    connection_manager: redis::aio::ConnectionManager,
}

impl RedisStore {
    /// Connect to `url` and set up a reconnecting connection manager.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(|e| {
            OrchestratorError::Config(format!("Failed to create Redis client: {}", e))
        })?;

        let connection_manager = redis::aio::ConnectionManager::new(client)
            .await
            .map_err(|e| {
                OrchestratorError::persistence(format!(
                    "Failed to create Redis connection manager: {}",
                    e
                ))
            })?;

        debug!("Connected to Redis at {}", url);
        Ok(Self { connection_manager })
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.connection_manager.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("EX").arg(ttl.as_secs().max(1));
        }
        let _: () = cmd.query_async(&mut conn).await.map_err(|e| {
            OrchestratorError::persistence(format!("Failed to store {}: {}", key, e))
        })?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection_manager.clone();
        let value: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| OrchestratorError::persistence(format!("Failed to read {}: {}", key, e)))?;
        Ok(value)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection_manager.clone();
        let removed: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                OrchestratorError::persistence(format!("Failed to delete {}: {}", key, e))
            })?;
        Ok(removed > 0)
    }

    async fn add_to_set(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.connection_manager.clone();
        let _: () = redis::cmd("SADD")
            .arg(key)
            .arg(member)
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                OrchestratorError::persistence(format!("Failed to add to {}: {}", key, e))
            })?;
        Ok(())
    }

    async fn remove_from_set(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.connection_manager.clone();
        let _: () = redis::cmd("SREM")
            .arg(key)
            .arg(member)
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                OrchestratorError::persistence(format!("Failed to remove from {}: {}", key, e))
            })?;
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.connection_manager.clone();
        let members: Vec<String> = redis::cmd("SMEMBERS")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                OrchestratorError::persistence(format!("Failed to list {}: {}", key, e))
            })?;
        Ok(members)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection_manager.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| OrchestratorError::persistence(format!("Redis ping failed: {}", e)))?;
        Ok(())
    }
}
