use anyhow::{bail, Context, Result};
use std::{env, net::SocketAddr, path::PathBuf, str::FromStr};
use tracing::info;

use crate::app::RateLimit;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_DB_NAME: &str = "moviedb";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MongoConfig {
    pub uri: String,
    pub database: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    Mongo(MongoConfig),
    Memory { seed_file: Option<PathBuf> },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub jwt_secret: String,
    pub backend: Backend,
    pub rate_limit: RateLimit,
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match lookup(key).filter(|v| !v.trim().is_empty()) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid {}: {}", key, e)),
        None => Ok(default),
    }
}

impl MongoConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(&|k: &str| env::var(k).ok())
    }

    pub fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Result<Self> {
        let uri = lookup("MONGODB_URI")
            .filter(|s| !s.is_empty())
            .context("MONGODB_URI must be set")?;
        let database = lookup("MONGODB_DB")
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_DB_NAME.to_string());
        Ok(Self { uri, database })
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|k: &str| env::var(k).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let host: std::net::IpAddr = parse_or(&lookup, "BIND_ADDR", [0, 0, 0, 0].into())?;
        let port: u16 = parse_or(&lookup, "PORT", DEFAULT_PORT)?;

        let jwt_secret = lookup("JWT_SECRET")
            .filter(|s| !s.is_empty())
            .context("JWT_SECRET must be set")?;

        let backend = match lookup("CATALOG_BACKEND")
            .unwrap_or_else(|| "mongo".to_string())
            .to_lowercase()
            .as_str()
        {
            "mongo" | "mongodb" => Backend::Mongo(MongoConfig::from_lookup(&lookup)?),
            "memory" => Backend::Memory {
                seed_file: lookup("CATALOG_SEED_FILE")
                    .filter(|s| !s.is_empty())
                    .map(PathBuf::from),
            },
            other => bail!("Unknown CATALOG_BACKEND '{}' (expected mongo or memory)", other),
        };

        let defaults = RateLimit::default();
        let rate_limit = RateLimit {
            per_minute: parse_or(&lookup, "RATE_LIMIT_PER_MINUTE", defaults.per_minute)?,
            burst: parse_or(&lookup, "RATE_LIMIT_BURST", defaults.burst)?,
        };

        let config = Self {
            bind_addr: SocketAddr::new(host, port),
            jwt_secret,
            backend,
            rate_limit,
        };
        info!(
            "Configuration loaded (bind {}, backend {})",
            config.bind_addr,
            match &config.backend {
                Backend::Mongo(m) => format!("mongo/{}", m.database),
                Backend::Memory { .. } => "memory".to_string(),
            }
        );
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k: &str| map.get(k).cloned()
    }

    #[test]
    fn requires_jwt_secret() {
        let err = Config::from_lookup(lookup(&[("MONGODB_URI", "mongodb://localhost")])).unwrap_err();
        assert!(err.to_string().contains("JWT_SECRET"));
    }

    #[test]
    fn mongo_backend_needs_uri_and_defaults_db_name() {
        assert!(Config::from_lookup(lookup(&[("JWT_SECRET", "s")])).is_err());
        let config = Config::from_lookup(lookup(&[
            ("JWT_SECRET", "s"),
            ("MONGODB_URI", "mongodb://localhost:27017"),
        ]))
        .unwrap();
        assert_eq!(
            config.backend,
            Backend::Mongo(MongoConfig {
                uri: "mongodb://localhost:27017".to_string(),
                database: DEFAULT_DB_NAME.to_string(),
            })
        );
        assert_eq!(config.bind_addr.port(), DEFAULT_PORT);
    }

    #[test]
    fn memory_backend_with_seed_file_and_custom_port() {
        let config = Config::from_lookup(lookup(&[
            ("JWT_SECRET", "s"),
            ("CATALOG_BACKEND", "memory"),
            ("CATALOG_SEED_FILE", "data/catalog.json"),
            ("PORT", "8080"),
            ("RATE_LIMIT_PER_MINUTE", "5"),
        ]))
        .unwrap();
        assert_eq!(
            config.backend,
            Backend::Memory {
                seed_file: Some(PathBuf::from("data/catalog.json"))
            }
        );
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.rate_limit.per_minute, 5);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(Config::from_lookup(lookup(&[
            ("JWT_SECRET", "s"),
            ("CATALOG_BACKEND", "memory"),
            ("PORT", "eighty"),
        ]))
        .is_err());
        assert!(Config::from_lookup(lookup(&[("JWT_SECRET", "s"), ("CATALOG_BACKEND", "redis")])).is_err());
    }
}
