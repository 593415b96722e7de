//! Configuration module for ledger-sync-service.

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use service_core::retry::RetryConfig;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SyncServiceConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub plaid: PlaidConfig,
    pub accounting: AccountingConfig,
    pub sync: SyncConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct PlaidConfig {
    pub base_url: String,
    pub client_id: String,
    pub secret: Secret<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct AccountingConfig {
    pub base_url: String,
    pub minor_version: u32,
    pub timeout: Duration,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Upper bound on `-N` suffixed create attempts after a duplicate-name conflict.
    pub max_suffix_attempts: u32,
    pub default_window_days: i64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_suffix_attempts: 3,
            default_window_days: 30,
        }
    }
}

/// Downstream accounting authorization for a single pass.
///
/// Passed in explicitly at pass start; nothing in the service keeps a
/// process-wide token.
#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    pub realm_id: String,
    pub access_token: Secret<String>,
    #[serde(default = "Utc::now")]
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Credentials {
    pub fn new(
        realm_id: impl Into<String>,
        access_token: impl Into<String>,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            realm_id: realm_id.into(),
            access_token: Secret::new(access_token.into()),
            issued_at,
            expires_at,
        }
    }

    /// True when `now` falls inside `[issued_at, expires_at)` and the token is non-empty.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.realm_id.is_empty()
            && !self.access_token.expose_secret().is_empty()
            && self.issued_at <= now
            && now < self.expires_at
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl SyncServiceConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;

        let retry = RetryConfig {
            max_retries: env_parse("REMOTE_MAX_RETRIES", 3),
            initial_backoff: Duration::from_millis(env_parse("REMOTE_INITIAL_BACKOFF_MS", 200)),
            max_backoff: Duration::from_millis(env_parse("REMOTE_MAX_BACKOFF_MS", 10_000)),
            ..RetryConfig::default()
        };

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "ledger-sync-service".to_string()),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok(),
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").map_err(|_| {
                    AppError::ConfigError(anyhow::anyhow!("DATABASE_URL is required"))
                })?,
                max_connections: env_parse("DATABASE_MAX_CONNECTIONS", 10),
                min_connections: env_parse("DATABASE_MIN_CONNECTIONS", 2),
            },
            plaid: PlaidConfig {
                base_url: env::var("PLAID_BASE_URL")
                    .unwrap_or_else(|_| "https://sandbox.plaid.com".to_string()),
                client_id: env::var("PLAID_CLIENT_ID").unwrap_or_default(),
                secret: Secret::new(env::var("PLAID_SECRET").unwrap_or_default()),
                timeout: Duration::from_secs(env_parse("PLAID_TIMEOUT_SECS", 30)),
            },
            accounting: AccountingConfig {
                base_url: env::var("ACCOUNTING_BASE_URL")
                    .unwrap_or_else(|_| "https://sandbox-quickbooks.api.intuit.com".to_string()),
                minor_version: env_parse("ACCOUNTING_MINOR_VERSION", 75),
                timeout: Duration::from_secs(env_parse("ACCOUNTING_TIMEOUT_SECS", 60)),
                retry,
            },
            sync: SyncConfig {
                max_suffix_attempts: env_parse("SYNC_MAX_SUFFIX_ATTEMPTS", 3),
                default_window_days: env_parse("SYNC_DEFAULT_WINDOW_DAYS", 30),
            },
        })
    }
}
