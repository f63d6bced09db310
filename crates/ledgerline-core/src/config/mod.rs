//! Environment-backed configuration with fail-fast validation.
//!
//! Required settings are validated once at startup; a missing master key or
//! platform signing secret is a fatal boot error, not a lazily discovered
//! one. Optional settings fall back to documented defaults.

use std::env;
use std::time::Duration;

use crate::crypto::MasterKey;
use crate::error::CoreError;

/// Default identity-resolution budget, including the tenant lookup.
const DEFAULT_IDENTITY_TIMEOUT_MS: u64 = 500;
/// Default per-statement timeout inside tenant transactions.
const DEFAULT_STATEMENT_TIMEOUT_MS: u64 = 5_000;
/// Default tenant registry cache TTL; also the cross-process upper bound on
/// propagating a `suspended` status.
const DEFAULT_TENANT_CACHE_TTL_SECS: u64 = 60;

/// Process configuration, loaded once in the application binary.
#[derive(Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    /// Signs lobby tokens; tenant tokens use per-tenant secrets.
    pub platform_jwt_secret: String,
    pub master_key: MasterKey,
    pub identity_resolution_timeout: Duration,
    pub statement_timeout: Duration,
    pub tenant_cache_ttl: Duration,
}

impl AppConfig {
    /// Load and validate configuration from the environment.
    pub fn from_env() -> Result<Self, CoreError> {
        let database_url = require_env("DATABASE_URL")?;
        let platform_jwt_secret = require_env("PLATFORM_JWT_SECRET")?;
        if platform_jwt_secret.len() < 32 {
            return Err(CoreError::configuration(
                "PLATFORM_JWT_SECRET must be at least 32 characters",
            ));
        }
        let master_key = MasterKey::from_hex(&require_env("GLOBAL_MASTER_KEY")?)?;

        Ok(Self {
            database_url,
            host: env_or("HOST", "127.0.0.1"),
            port: parse_env("PORT", 8080)?,
            platform_jwt_secret,
            master_key,
            identity_resolution_timeout: Duration::from_millis(parse_env(
                "IDENTITY_RESOLUTION_TIMEOUT_MS",
                DEFAULT_IDENTITY_TIMEOUT_MS,
            )?),
            statement_timeout: Duration::from_millis(parse_env(
                "STATEMENT_TIMEOUT_MS",
                DEFAULT_STATEMENT_TIMEOUT_MS,
            )?),
            tenant_cache_ttl: Duration::from_secs(parse_env(
                "TENANT_CACHE_TTL_SECS",
                DEFAULT_TENANT_CACHE_TTL_SECS,
            )?),
        })
    }
}

fn require_env(key: &str) -> Result<String, CoreError> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(CoreError::configuration(format!(
            "required environment variable {} is not set",
            key
        ))),
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T, CoreError> {
    match env::var(key) {
        Ok(value) => value.parse().map_err(|_| {
            CoreError::configuration(format!("environment variable {} is not a valid value", key))
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn set_required_env() {
        env::set_var("DATABASE_URL", "postgres://localhost/ledgerline_test");
        env::set_var("PLATFORM_JWT_SECRET", "0123456789abcdef0123456789abcdef");
        env::set_var("GLOBAL_MASTER_KEY", "ab".repeat(32));
    }

    fn clear_env() {
        for key in [
            "DATABASE_URL",
            "PLATFORM_JWT_SECRET",
            "GLOBAL_MASTER_KEY",
            "PORT",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_missing_master_key_is_fatal() {
        set_required_env();
        env::remove_var("GLOBAL_MASTER_KEY");

        let err = AppConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("GLOBAL_MASTER_KEY"));
        clear_env();
    }

    #[test]
    #[serial]
    fn test_short_master_key_is_fatal() {
        set_required_env();
        env::set_var("GLOBAL_MASTER_KEY", "abcd");

        assert!(AppConfig::from_env().is_err());
        clear_env();
    }

    #[test]
    #[serial]
    fn test_defaults_applied() {
        set_required_env();
        env::remove_var("PORT");

        let config = AppConfig::from_env().expect("config");
        assert_eq!(config.port, 8080);
        assert_eq!(config.identity_resolution_timeout, Duration::from_millis(500));
        assert_eq!(config.statement_timeout, Duration::from_millis(5_000));
        assert_eq!(config.tenant_cache_ttl, Duration::from_secs(60));
        clear_env();
    }

    #[test]
    #[serial]
    fn test_invalid_port_rejected() {
        set_required_env();
        env::set_var("PORT", "not-a-port");

        assert!(AppConfig::from_env().is_err());
        clear_env();
    }
}
