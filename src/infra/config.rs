use std::net::SocketAddr;
use std::time::Duration;

use env_helpers::get_env_default;
use secrecy::SecretString;
use url::Url;

use crate::{
    application::{
        use_cases::{change_notification::NotifierConfig, webhook_ingestion::IngestionConfig},
        validators::normalize_currency,
    },
    infra::error::InfraError,
};

pub struct AppConfig {
    pub database_url: SecretString,
    pub database_max_connections: u32,
    /// Apply pending migrations at boot.
    pub run_migrations: bool,
    pub bind_addr: SocketAddr,
    /// ISO-4217 code used for payments that carry no currency.
    pub default_currency: String,
    pub max_webhook_body_bytes: usize,
    /// Collaborator endpoint for subscription change notifications. Unset
    /// disables outbound notifications.
    pub notify_url: Option<Url>,
    pub notify_timeout: Duration,
    pub notify_max_attempts: u32,
    /// Optional JSON log file in addition to console output.
    pub log_file: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, InfraError> {
        let database_url = std::env::var("DATABASE_URL")
            .map(SecretString::from)
            .map_err(|_| InfraError::ConfigMissing {
                var: "DATABASE_URL",
            })?;
        let database_max_connections: u32 = get_env_default("DATABASE_MAX_CONNECTIONS", 5);
        let run_migrations: bool = get_env_default("RUN_MIGRATIONS", true);
        let bind_addr: SocketAddr =
            get_env_default("BIND_ADDR", SocketAddr::from(([127, 0, 0, 1], 8080)));

        let raw_currency: String = get_env_default("DEFAULT_CURRENCY", "RUB".to_string());
        let default_currency =
            normalize_currency(&raw_currency).ok_or(InfraError::ConfigInvalid {
                var: "DEFAULT_CURRENCY",
            })?;

        let max_webhook_body_bytes: usize = get_env_default("MAX_WEBHOOK_BODY_BYTES", 64 * 1024);

        let notify_url = match std::env::var("NOTIFY_URL") {
            Ok(raw) if !raw.trim().is_empty() => Some(
                Url::parse(raw.trim())
                    .map_err(|_| InfraError::ConfigInvalid { var: "NOTIFY_URL" })?,
            ),
            _ => None,
        };
        let notify_timeout_ms: u64 = get_env_default("NOTIFY_TIMEOUT_MS", 5_000);
        let notify_max_attempts: u32 = get_env_default("NOTIFY_MAX_ATTEMPTS", 3);
        let log_file = std::env::var("LOG_FILE").ok().filter(|s| !s.is_empty());

        Ok(Self {
            database_url,
            database_max_connections,
            run_migrations,
            bind_addr,
            default_currency,
            max_webhook_body_bytes,
            notify_url,
            notify_timeout: Duration::from_millis(notify_timeout_ms),
            notify_max_attempts,
            log_file,
        })
    }

    pub fn ingestion_config(&self) -> IngestionConfig {
        IngestionConfig {
            default_currency: self.default_currency.clone(),
        }
    }

    pub fn notifier_config(&self) -> NotifierConfig {
        NotifierConfig {
            max_attempts: self.notify_max_attempts.max(1),
            ..NotifierConfig::default()
        }
    }
}
