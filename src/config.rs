//! Settings come from a YAML secrets file, then environment variables override it.
//! Credentials are allowed to be missing here; the connector reports them on connect
//! so the page can show what needs configuring.

use std::{net::SocketAddr, path::Path, time::Duration};

use anyhow::{Context, Result};
use serde::Deserialize;

pub const DEFAULT_CLICKHOUSE_PORT: u16 = 8443;
pub const DEFAULT_DATABASE: &str = "default";
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8501";
pub const DEFAULT_CACHE_TTL_SECS: u64 = 300;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct Settings {
    pub listen_addr: SocketAddr,
    pub cache_ttl: Duration,
    pub clickhouse: ClickHouseConfig,
}

#[derive(Debug, Clone)]
pub struct ClickHouseConfig {
    pub host: Option<String>,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub database: String,
    pub timeout: Duration,
    // TLS is not optional for ClickHouse Cloud.
    pub secure: bool,
}

/// Shape of `secrets.yaml`. Keys mirror the environment variable names.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct SecretsFile {
    pub clickhouse_host: Option<String>,
    pub clickhouse_port: Option<u16>,
    pub clickhouse_user: Option<String>,
    pub clickhouse_password: Option<String>,
    pub clickhouse_database: Option<String>,
}

impl SecretsFile {
    fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("read secrets file {}", path.display()))?;
        serde_yaml::from_str(&content).context("parse secrets yaml")
    }
}

impl Settings {
    pub fn load() -> Result<Self> {
        let path = std::env::var("DASHBOARD_SECRETS").unwrap_or_else(|_| "secrets.yaml".into());
        let secrets = SecretsFile::load_from_file(Path::new(&path)).unwrap_or_else(|err| {
            tracing::warn!(?err, path = %path, "secrets file unavailable, using environment only");
            SecretsFile::default()
        });
        Self::from_sources(secrets, |key| std::env::var(key).ok())
    }

    /// Merge the secrets file with a variable lookup (environment in production).
    pub fn from_sources(
        secrets: SecretsFile,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let listen_addr: SocketAddr = var("DASHBOARD_ADDR")
            .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string())
            .parse()
            .context("parse DASHBOARD_ADDR")?;
        let cache_ttl = match var("CACHE_TTL_SECS") {
            Some(raw) => raw.parse::<u64>().context("parse CACHE_TTL_SECS")?,
            None => DEFAULT_CACHE_TTL_SECS,
        };
        let timeout = match var("CLICKHOUSE_TIMEOUT_SECS") {
            Some(raw) => raw.parse::<u64>().context("parse CLICKHOUSE_TIMEOUT_SECS")?,
            None => DEFAULT_TIMEOUT_SECS,
        };
        let port = match var("CLICKHOUSE_PORT") {
            Some(raw) => raw.parse::<u16>().context("parse CLICKHOUSE_PORT")?,
            None => secrets.clickhouse_port.unwrap_or(DEFAULT_CLICKHOUSE_PORT),
        };

        Ok(Self {
            listen_addr,
            cache_ttl: Duration::from_secs(cache_ttl),
            clickhouse: ClickHouseConfig {
                host: var("CLICKHOUSE_HOST").or(secrets.clickhouse_host),
                port,
                username: var("CLICKHOUSE_USER").or(secrets.clickhouse_user),
                password: var("CLICKHOUSE_PASSWORD").or(secrets.clickhouse_password),
                database: var("CLICKHOUSE_DATABASE")
                    .or(secrets.clickhouse_database)
                    .unwrap_or_else(|| DEFAULT_DATABASE.to_string()),
                timeout: Duration::from_secs(timeout),
                secure: true,
            },
        })
    }
}
