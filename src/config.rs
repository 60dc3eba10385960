use std::path::PathBuf;
use std::time::Duration;

use crate::authz::AuthzMode;
use crate::errors::AppError;

const DEFAULT_CACHE_TTL_SECS: u64 = 300;
const DEFAULT_STORE_TIMEOUT_MS: u64 = 2000;
const DEFAULT_AUDIT_BUFFER: usize = 1024;
const DEFAULT_BODY_LIMIT: usize = 1024 * 1024;
const DEFAULT_APP_PORT: u16 = 8000;

#[derive(Debug, Clone)]
pub struct AuthzConfig {
    pub mode: AuthzMode,
    pub role_cache_ttl: Duration,
    pub permission_cache_ttl: Duration,
    pub store_timeout: Duration,
    pub audit_buffer: usize,
    pub body_limit: usize,
    pub static_roles_path: Option<PathBuf>,
    pub operations_path: Option<PathBuf>,
    /// Required by the service binary, unused when the engine is embedded.
    pub database_url: Option<String>,
    pub app_port: u16,
}

impl Default for AuthzConfig {
    fn default() -> Self {
        Self {
            mode: AuthzMode::Strict,
            role_cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            permission_cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            store_timeout: Duration::from_millis(DEFAULT_STORE_TIMEOUT_MS),
            audit_buffer: DEFAULT_AUDIT_BUFFER,
            body_limit: DEFAULT_BODY_LIMIT,
            static_roles_path: None,
            operations_path: None,
            database_url: None,
            app_port: DEFAULT_APP_PORT,
        }
    }
}

impl AuthzConfig {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; `from_env` uses the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let defaults = Self::default();

        let mode = match lookup("AUTHZ_MODE") {
            Some(raw) => AuthzMode::parse(&raw)
                .ok_or_else(|| AppError::configuration(format!("AUTHZ_MODE must be strict or advisory, got '{raw}'")))?,
            None => defaults.mode,
        };

        Ok(Self {
            mode,
            role_cache_ttl: parse_or(&lookup, "AUTHZ_ROLE_CACHE_TTL_SECS", DEFAULT_CACHE_TTL_SECS).map(Duration::from_secs)?,
            permission_cache_ttl: parse_or(&lookup, "AUTHZ_PERMISSION_CACHE_TTL_SECS", DEFAULT_CACHE_TTL_SECS)
                .map(Duration::from_secs)?,
            store_timeout: parse_or(&lookup, "AUTHZ_STORE_TIMEOUT_MS", DEFAULT_STORE_TIMEOUT_MS).map(Duration::from_millis)?,
            audit_buffer: parse_or(&lookup, "AUTHZ_AUDIT_BUFFER", DEFAULT_AUDIT_BUFFER)?,
            body_limit: parse_or(&lookup, "AUTHZ_BODY_LIMIT_BYTES", DEFAULT_BODY_LIMIT)?,
            static_roles_path: lookup("AUTHZ_STATIC_ROLES_PATH").map(PathBuf::from),
            operations_path: lookup("AUTHZ_OPERATIONS_PATH").map(PathBuf::from),
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            app_port: parse_or(&lookup, "APP_PORT", DEFAULT_APP_PORT)?,
        })
    }
}

fn parse_or<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T, AppError> {
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::configuration(format!("{key} must be a valid number, got '{raw}'"))),
        None => Ok(default),
    }
}
