use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::postgres::PgConnectOptions;

/// Engine identifier written into every registry entry. Existing registry
/// files are shared with the application's runtime connection layer, which
/// keys its driver choice off this value.
pub const POSTGRES_ENGINE: &str = "django.db.backends.postgresql_psycopg2";

/// Host, port and credentials every tenant database is reached with.
#[derive(Debug, Clone)]
pub struct ConnectionDefaults {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

impl Default for ConnectionDefaults {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 5432,
            user: "admin".into(),
            password: "admin".into(),
        }
    }
}

/// Test-mode settings nested under `TEST` in a registry entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct TestConfig {
    pub charset: Option<String>,
    pub collation: Option<String>,
    pub migrate: bool,
    pub mirror: Option<String>,
    pub name: Option<String>,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            charset: None,
            collation: None,
            migrate: true,
            mirror: None,
            name: None,
        }
    }
}

/// Connection descriptor for one provisioned database, as stored in the
/// registry file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct DatabaseConfig {
    pub engine: String,
    pub name: String,
    pub user: String,
    pub password: String,
    pub host: String,
    /// Kept as a string to stay byte-compatible with existing registry files.
    pub port: String,
    pub atomic_requests: bool,
    pub autocommit: bool,
    pub conn_max_age: u64,
    pub conn_health_checks: bool,
    #[serde(default)]
    pub options: Map<String, Value>,
    pub time_zone: Option<String>,
    #[serde(default)]
    pub test: TestConfig,
}

impl DatabaseConfig {
    pub fn for_tenant(db_name: &str, defaults: &ConnectionDefaults) -> Self {
        Self {
            engine: POSTGRES_ENGINE.into(),
            name: db_name.into(),
            user: defaults.user.clone(),
            password: defaults.password.clone(),
            host: defaults.host.clone(),
            port: defaults.port.to_string(),
            atomic_requests: false,
            autocommit: true,
            conn_max_age: 0,
            conn_health_checks: false,
            options: Map::new(),
            time_zone: None,
            test: TestConfig::default(),
        }
    }

    /// Options for opening a connection to this database.
    pub fn connect_options(&self) -> Result<PgConnectOptions, sqlx::Error> {
        let port: u16 = self
            .port
            .parse()
            .map_err(|e| sqlx::Error::Configuration(Box::new(e)))?;

        Ok(PgConnectOptions::new()
            .host(&self.host)
            .port(port)
            .username(&self.user)
            .password(&self.password)
            .database(&self.name))
    }
}
