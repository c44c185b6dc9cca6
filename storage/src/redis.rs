use async_trait::async_trait;
use broker_core::CounterStore;
use errors::StorageError;
use redis::AsyncCommands;

/// Counter store shared by every broker process through Redis.
///
/// Increments map onto `INCRBY`, which is atomic server-side.
pub struct RedisCounterStore {
    connection_manager: redis::aio::ConnectionManager,
    key_prefix: String,
}

impl RedisCounterStore {
    pub async fn new(connection_string: &str, key_prefix: &str) -> Result<Self, StorageError> {
        let client =
            redis::Client::open(connection_string).map_err(|e| StorageError::ConnectionError {
                backend: "Redis".to_string(),
                reason: e.to_string(),
            })?;

        let connection_manager =
            client
                .get_connection_manager()
                .await
                .map_err(|e| StorageError::ConnectionError {
                    backend: "Redis".to_string(),
                    reason: e.to_string(),
                })?;

        Ok(Self {
            connection_manager,
            key_prefix: key_prefix.to_string(),
        })
    }

    pub async fn from_config(config: &config::RedisConfig) -> Result<Option<Self>, StorageError> {
        match &config.url {
            Some(url) => Ok(Some(Self::new(url, &config.key_prefix).await?)),
            None => Ok(None),
        }
    }

    pub fn scoped_key(&self, key: &str) -> String {
        format!("{}:{}", self.key_prefix, key)
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment(&self, key: &str, by: u64) -> Result<u64, StorageError> {
        let mut conn = self.connection_manager.clone();
        conn.incr(self.scoped_key(key), by)
            .await
            .map_err(|e| StorageError::QueryError {
                backend: "Redis".to_string(),
                reason: e.to_string(),
            })
    }

    async fn get(&self, key: &str) -> Result<u64, StorageError> {
        let mut conn = self.connection_manager.clone();
        let value: Option<u64> =
            conn.get(self.scoped_key(key))
                .await
                .map_err(|e| StorageError::QueryError {
                    backend: "Redis".to_string(),
                    reason: e.to_string(),
                })?;
        Ok(value.unwrap_or(0))
    }
}
