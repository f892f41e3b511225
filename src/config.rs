use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub graph: GraphConfig,
    pub blobs: BlobConfig,
    pub cache: CacheConfig,
    pub identity: IdentityConfig,
    pub retry: RetryConfig,
    pub limits: LimitsConfig,
    /// Re-read the graph after a delete commits and flag a vertex that survived.
    pub verify_deletes: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobConfig {
    pub root: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub capacity: usize,
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    pub secret: String,
    pub issuer: String,
    pub token_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    pub max_body_len: usize,
    pub max_media: usize,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let config = Self {
            graph: GraphConfig {
                url: env_or("GRAPH_DATABASE_URL", "sqlite:data/graph.db"),
                max_connections: env_parse("GRAPH_MAX_CONNECTIONS", 5),
            },
            blobs: BlobConfig {
                root: env_or("BLOB_ROOT", "data/blobs"),
            },
            cache: CacheConfig {
                capacity: env_parse("CACHE_CAPACITY", 1000),
                ttl_secs: env_parse("CACHE_TTL_SECS", 300),
            },
            identity: IdentityConfig {
                secret: env_or("IDENTITY_SECRET", "dev-only-identity-secret"),
                issuer: env_or("IDENTITY_ISSUER", "content-service"),
                token_ttl_secs: env_parse("IDENTITY_TOKEN_TTL_SECS", 3600),
            },
            retry: RetryConfig {
                max_attempts: env_parse("RETRY_MAX_ATTEMPTS", 3),
                base_delay_ms: env_parse("RETRY_BASE_DELAY_MS", 50),
                max_delay_ms: env_parse("RETRY_MAX_DELAY_MS", 2000),
            },
            limits: LimitsConfig {
                max_body_len: env_parse("MAX_BODY_LEN", 5000),
                max_media: env_parse("MAX_MEDIA_PER_POST", 4),
            },
            verify_deletes: env_parse("VERIFY_DELETES", true),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.cache.capacity == 0 {
            anyhow::bail!("CACHE_CAPACITY must be greater than zero");
        }
        if self.retry.max_attempts == 0 {
            anyhow::bail!("RETRY_MAX_ATTEMPTS must be at least 1");
        }
        if self.identity.secret.len() < 16 {
            anyhow::bail!("IDENTITY_SECRET must be at least 16 bytes");
        }
        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            graph: GraphConfig {
                url: "sqlite:data/graph.db".to_string(),
                max_connections: 5,
            },
            blobs: BlobConfig {
                root: "data/blobs".to_string(),
            },
            cache: CacheConfig {
                capacity: 1000,
                ttl_secs: 300,
            },
            identity: IdentityConfig {
                secret: "dev-only-identity-secret".to_string(),
                issuer: "content-service".to_string(),
                token_ttl_secs: 3600,
            },
            retry: RetryConfig {
                max_attempts: 3,
                base_delay_ms: 50,
                max_delay_ms: 2000,
            },
            limits: LimitsConfig {
                max_body_len: 5000,
                max_media: 4,
            },
            verify_deletes: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_short_secret_rejected() {
        let mut config = Config::default();
        config.identity.secret = "short".to_string();
        assert!(config.validate().is_err());
    }
}
