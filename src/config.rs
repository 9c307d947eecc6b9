use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;

use crate::models::database_config::ConnectionDefaults;

#[derive(Debug, Clone)]
pub struct Config {
    /// Administrative connection used for CREATE/DROP DATABASE. Only the
    /// provisioning commands need it.
    pub admin_database_url: Option<String>,
    /// How tenant databases are reached once created.
    pub tenant_connection: ConnectionDefaults,
    pub registry_path: PathBuf,
    pub bcrypt_cost: u32,
    pub provision_timeout: Duration,
    pub migrate_timeout: Duration,
    pub account_timeout: Duration,
    /// Upper bound on tenants provisioned at once by the batch command.
    pub concurrency: usize,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = ConnectionDefaults::default();
        Ok(Self {
            admin_database_url: env::var("ADMIN_DATABASE_URL").ok().filter(|url| !url.is_empty()),
            tenant_connection: ConnectionDefaults {
                host: env::var("TENANT_DB_HOST").unwrap_or(defaults.host),
                port: parsed("TENANT_DB_PORT", defaults.port)?,
                user: env::var("TENANT_DB_USER").unwrap_or(defaults.user),
                password: env::var("TENANT_DB_PASSWORD").unwrap_or(defaults.password),
            },
            registry_path: env::var("DB_REGISTRY_PATH")
                .unwrap_or_else(|_| "db.json".into())
                .into(),
            bcrypt_cost: parsed("BCRYPT_COST", bcrypt::DEFAULT_COST)?,
            provision_timeout: Duration::from_secs(parsed("PROVISION_TIMEOUT_SECS", 30)?),
            migrate_timeout: Duration::from_secs(parsed("MIGRATE_TIMEOUT_SECS", 300)?),
            account_timeout: Duration::from_secs(parsed("ACCOUNT_TIMEOUT_SECS", 30)?),
            concurrency: parsed::<usize>("PROVISION_CONCURRENCY", 4)?.max(1),
        })
    }

    pub fn admin_database_url(&self) -> anyhow::Result<&str> {
        self.admin_database_url
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("Missing required env var: ADMIN_DATABASE_URL"))
    }
}

fn parsed<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) if !raw.is_empty() => raw.parse().with_context(|| format!("parse {key}")),
        _ => Ok(default),
    }
}
