use crate::adapters::outbound::{PostgresConfig, SqliteConfig};
use crate::domain::value_objects::{RetryConfig, RetryPolicy, Role};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Which datastore adapter to connect with.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DbDriver {
    #[default]
    Postgres,
    Sqlite,
}

impl DbDriver {
    pub fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(Self::Postgres),
            "sqlite" => Ok(Self::Sqlite),
            other => anyhow::bail!("unsupported DB_DRIVER '{}' (expected postgres or sqlite)", other),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    // HTTP listener
    pub host: String,
    pub port: u16,
    pub debug: bool,
    pub cors_allowed_origins: Vec<String>,
    pub shutdown_timeout_secs: u64,

    // Datastore
    pub db_driver: DbDriver,
    pub database_url: Option<String>,
    pub postgres_host: String,
    pub postgres_port: u16,
    pub postgres_user: String,
    pub postgres_password: String,
    pub postgres_db: String,
    pub sqlite_path: String,
    pub db_pool_max: u32,
    pub db_pool_idle_timeout_secs: u64,
    pub db_connect_timeout_secs: u64,

    // Connection retry
    pub db_retry_interval_secs: u64,
    pub db_retry_max_attempts: u32,
    pub db_probe_interval_secs: u64,

    // Authentication
    pub jwt_secret: String,
    pub jwt_expires_in_secs: u64,
    pub auth_username: String,
    pub auth_password: Option<String>,
    pub auth_password_hash: Option<String>,
    pub auth_role: Role,

    // Build metadata and metrics
    pub app_version: String,
    pub git_sha: String,
    pub metrics_prefix: String,
}

pub const DEFAULT_AUTH_USERNAME: &str = "admin";
pub const DEFAULT_AUTH_PASSWORD: &str = "admin123";

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            debug: false,
            cors_allowed_origins: Vec::new(),
            shutdown_timeout_secs: 10,
            db_driver: DbDriver::Postgres,
            database_url: None,
            postgres_host: "localhost".to_string(),
            postgres_port: 5432,
            postgres_user: "postgres".to_string(),
            postgres_password: String::new(),
            postgres_db: "journal".to_string(),
            sqlite_path: "journal.db".to_string(),
            db_pool_max: 10,
            db_pool_idle_timeout_secs: 30,
            db_connect_timeout_secs: 5,
            db_retry_interval_secs: 2,
            db_retry_max_attempts: 0,
            db_probe_interval_secs: 10,
            jwt_secret: String::new(),
            jwt_expires_in_secs: 3600,
            auth_username: DEFAULT_AUTH_USERNAME.to_string(),
            auth_password: None,
            auth_password_hash: None,
            auth_role: Role::Admin,
            app_version: "dev".to_string(),
            git_sha: "unknown".to_string(),
            metrics_prefix: "journal".to_string(),
        }
    }
}

impl Config {
    /// Socket address the HTTP server binds to.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            interval: Duration::from_secs(self.db_retry_interval_secs),
            policy: RetryPolicy::from_max_attempts(self.db_retry_max_attempts),
            probe_interval: Duration::from_secs(self.db_probe_interval_secs.max(1)),
        }
    }

    pub fn postgres_config(&self) -> PostgresConfig {
        PostgresConfig {
            url: self.database_url.clone(),
            host: self.postgres_host.clone(),
            port: self.postgres_port,
            user: self.postgres_user.clone(),
            password: self.postgres_password.clone(),
            database: self.postgres_db.clone(),
            max_connections: self.db_pool_max.max(1),
            idle_timeout: Duration::from_secs(self.db_pool_idle_timeout_secs),
            connect_timeout: Duration::from_secs(self.db_connect_timeout_secs),
        }
    }

    pub fn sqlite_config(&self) -> SqliteConfig {
        SqliteConfig {
            path: PathBuf::from(&self.sqlite_path),
            max_connections: self.db_pool_max.max(1),
            idle_timeout: Duration::from_secs(self.db_pool_idle_timeout_secs),
            connect_timeout: Duration::from_secs(self.db_connect_timeout_secs),
            ..SqliteConfig::default()
        }
    }

    /// Whether the login account falls back to the built-in dev password.
    pub fn uses_default_password(&self) -> bool {
        self.auth_password.is_none() && self.auth_password_hash.is_none()
    }

    /// Plaintext password to hash at startup, when no hash is configured.
    pub fn auth_password(&self) -> &str {
        self.auth_password.as_deref().unwrap_or(DEFAULT_AUTH_PASSWORD)
    }
}

pub fn load_config() -> anyhow::Result<Config> {
    from_lookup(|key| std::env::var(key).ok())
}

/// Build the configuration from a variable lookup.
///
/// Unset variables take their defaults. Numbers that fail to parse fall
/// back to the default. A missing `JWT_SECRET` or an unknown `DB_DRIVER`
/// is an error.
pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = Config::default();
    let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
    let string = |key: &str, default: &str| var(key).unwrap_or_else(|| default.to_string());

    let jwt_secret = var("JWT_SECRET")
        .ok_or_else(|| anyhow::anyhow!("JWT_SECRET must be set"))?;

    let db_driver = match var("DB_DRIVER") {
        Some(v) => DbDriver::from_str(&v)?,
        None => defaults.db_driver,
    };

    let debug = lookup("DEBUG")
        .map(|v| !matches!(v.trim().to_lowercase().as_str(), "" | "0" | "false"))
        .unwrap_or(false);

    let cors_allowed_origins = var("CORS_ALLOWED_ORIGINS")
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default();

    Ok(Config {
        host: string("HOST", &defaults.host),
        port: parse_or(var("PORT"), defaults.port),
        debug,
        cors_allowed_origins,
        shutdown_timeout_secs: parse_or(var("SHUTDOWN_TIMEOUT_SECS"), defaults.shutdown_timeout_secs),
        db_driver,
        database_url: var("DATABASE_URL"),
        postgres_host: string("POSTGRES_HOST", &defaults.postgres_host),
        postgres_port: parse_or(var("POSTGRES_PORT"), defaults.postgres_port),
        postgres_user: string("POSTGRES_USER", &defaults.postgres_user),
        postgres_password: lookup("POSTGRES_PASSWORD").unwrap_or_default(),
        postgres_db: string("POSTGRES_DB", &defaults.postgres_db),
        sqlite_path: string("SQLITE_PATH", &defaults.sqlite_path),
        db_pool_max: parse_or(var("DB_POOL_MAX"), defaults.db_pool_max),
        db_pool_idle_timeout_secs: parse_or(
            var("DB_POOL_IDLE_TIMEOUT_SECS"),
            defaults.db_pool_idle_timeout_secs,
        ),
        db_connect_timeout_secs: parse_or(
            var("DB_CONNECT_TIMEOUT_SECS"),
            defaults.db_connect_timeout_secs,
        ),
        db_retry_interval_secs: parse_or(
            var("DB_RETRY_INTERVAL_SECS"),
            defaults.db_retry_interval_secs,
        ),
        db_retry_max_attempts: parse_or(
            var("DB_RETRY_MAX_ATTEMPTS"),
            defaults.db_retry_max_attempts,
        ),
        db_probe_interval_secs: parse_or(
            var("DB_PROBE_INTERVAL_SECS"),
            defaults.db_probe_interval_secs,
        ),
        jwt_secret,
        jwt_expires_in_secs: parse_or(var("JWT_EXPIRES_IN_SECS"), defaults.jwt_expires_in_secs),
        auth_username: string("AUTH_USERNAME", &defaults.auth_username),
        auth_password: var("AUTH_PASSWORD"),
        auth_password_hash: var("AUTH_PASSWORD_HASH"),
        auth_role: var("AUTH_ROLE")
            .map(|v| Role::from_str(&v))
            .unwrap_or(defaults.auth_role),
        app_version: string("APP_VERSION", &defaults.app_version),
        git_sha: string("GIT_SHA", &defaults.git_sha),
        metrics_prefix: string("METRICS_PREFIX", &defaults.metrics_prefix),
    })
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, default: T) -> T {
    value
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> anyhow::Result<Config> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.listen_addr(), "0.0.0.0:3000");
        assert_eq!(cfg.db_driver, DbDriver::Postgres);
        assert_eq!(cfg.db_retry_interval_secs, 2);
        assert_eq!(cfg.db_retry_max_attempts, 0);
        assert_eq!(cfg.auth_role, Role::Admin);
    }

    #[test]
    fn test_load_config_defaults() {
        let cfg = load(&[("JWT_SECRET", "s")]).unwrap();
        assert_eq!(cfg.jwt_secret, "s");
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.postgres_db, "journal");
        assert_eq!(cfg.sqlite_path, "journal.db");
        assert_eq!(cfg.jwt_expires_in_secs, 3600);
        assert_eq!(cfg.metrics_prefix, "journal");
        assert!(!cfg.debug);
        assert!(cfg.cors_allowed_origins.is_empty());
        assert!(cfg.uses_default_password());
        assert_eq!(cfg.auth_password(), DEFAULT_AUTH_PASSWORD);
    }

    #[test]
    fn test_missing_jwt_secret_is_error() {
        assert!(load(&[]).is_err());
        assert!(load(&[("JWT_SECRET", "  ")]).is_err());
    }

    #[test]
    fn test_db_driver() {
        let cfg = load(&[("JWT_SECRET", "s"), ("DB_DRIVER", "SQLite")]).unwrap();
        assert_eq!(cfg.db_driver, DbDriver::Sqlite);
        assert!(load(&[("JWT_SECRET", "s"), ("DB_DRIVER", "mysql")]).is_err());
    }

    #[test]
    fn test_debug_flag() {
        assert!(load(&[("JWT_SECRET", "s"), ("DEBUG", "1")]).unwrap().debug);
        assert!(load(&[("JWT_SECRET", "s"), ("DEBUG", "true")]).unwrap().debug);
        assert!(!load(&[("JWT_SECRET", "s"), ("DEBUG", "false")]).unwrap().debug);
    }

    #[test]
    fn test_parse_error_uses_default() {
        let cfg = load(&[
            ("JWT_SECRET", "s"),
            ("PORT", "not_a_number"),
            ("DB_POOL_MAX", "-3"),
        ])
        .unwrap();
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.db_pool_max, 10);
    }

    #[test]
    fn test_custom_values() {
        let cfg = load(&[
            ("JWT_SECRET", "s"),
            ("HOST", "127.0.0.1"),
            ("PORT", "8080"),
            ("DATABASE_URL", "postgres://u:p@db:5432/j"),
            ("DB_RETRY_MAX_ATTEMPTS", "5"),
            ("DB_RETRY_INTERVAL_SECS", "1"),
            ("AUTH_USERNAME", "alice"),
            ("AUTH_PASSWORD", "pw"),
            ("AUTH_ROLE", "user"),
            ("CORS_ALLOWED_ORIGINS", "http://a.test, http://b.test,"),
        ])
        .unwrap();

        assert_eq!(cfg.listen_addr(), "127.0.0.1:8080");
        assert_eq!(cfg.database_url.as_deref(), Some("postgres://u:p@db:5432/j"));
        assert_eq!(cfg.auth_username, "alice");
        assert_eq!(cfg.auth_password(), "pw");
        assert!(!cfg.uses_default_password());
        assert_eq!(cfg.auth_role, Role::User);
        assert_eq!(
            cfg.cors_allowed_origins,
            vec!["http://a.test".to_string(), "http://b.test".to_string()]
        );

        let retry = cfg.retry_config();
        assert_eq!(retry.interval, Duration::from_secs(1));
        assert_eq!(retry.policy, RetryPolicy::Bounded { max_attempts: 5 });
    }

    #[test]
    fn test_adapter_configs() {
        let cfg = load(&[
            ("JWT_SECRET", "s"),
            ("POSTGRES_HOST", "pg"),
            ("POSTGRES_PASSWORD", "secret"),
            ("DB_POOL_MAX", "4"),
            ("DB_CONNECT_TIMEOUT_SECS", "3"),
            ("SQLITE_PATH", "/data/j.db"),
        ])
        .unwrap();

        let pg = cfg.postgres_config();
        assert_eq!(pg.host, "pg");
        assert_eq!(pg.password, "secret");
        assert_eq!(pg.max_connections, 4);
        assert_eq!(pg.connect_timeout, Duration::from_secs(3));
        assert!(pg.url.is_none());

        let sqlite = cfg.sqlite_config();
        assert_eq!(sqlite.path, PathBuf::from("/data/j.db"));
        assert_eq!(sqlite.max_connections, 4);
        assert_eq!(sqlite.connect_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_config_debug() {
        let cfg = Config::default();
        let debug_str = format!("{:?}", cfg);
        assert!(debug_str.contains("host"));
        assert!(debug_str.contains("0.0.0.0"));
    }
}
