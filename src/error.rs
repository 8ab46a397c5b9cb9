use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Timed out waiting for lock on key: {key}")]
    LockTimeout { key: String },

    #[error("Factory exceeded its soft timeout for key: {key}")]
    FactorySoftTimeout { key: String },

    #[error("Factory exceeded its hard timeout for key: {key}")]
    FactoryHardTimeout { key: String },

    #[error("Factory failed: {0}")]
    Factory(#[from] anyhow::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Generic error: {message}")]
    Generic { message: String },
}

impl CacheError {
    /// True for factory outcomes that may be recovered by serving a graced
    /// stale item. Lock timeouts and soft timeouts have their own recovery
    /// branches; driver and serialization errors always propagate.
    pub fn is_grace_recoverable(&self) -> bool {
        matches!(
            self,
            CacheError::Factory(_) | CacheError::FactoryHardTimeout { .. }
        )
    }
}

pub type CacheResult<T> = Result<T, CacheError>;
