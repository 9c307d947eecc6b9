use std::time::Duration;

use async_trait::async_trait;
use sqlx::migrate::Migrator;
use sqlx::postgres::PgConnection;
use sqlx::Connection;
use tracing::info;

use crate::error::MigrationError;
use crate::models::database_config::DatabaseConfig;

/// Tenant schema, embedded from ./migrations/tenant/
static TENANT_MIGRATIONS: Migrator = sqlx::migrate!("./migrations/tenant");

/// Version of the newest embedded tenant migration.
pub fn latest_version() -> Option<i64> {
    TENANT_MIGRATIONS.iter().map(|m| m.version).max()
}

/// Applies pending schema migrations to one tenant database.
#[async_trait]
pub trait SchemaMigrator: Send + Sync {
    async fn migrate(&self, target: &DatabaseConfig) -> Result<(), MigrationError>;
}

pub struct SqlxMigrator {
    timeout: Duration,
}

impl SqlxMigrator {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn run(&self, target: &DatabaseConfig) -> Result<(), MigrationError> {
        // Connect straight to the target so nothing can reach the catalog database.
        let options = target.connect_options().map_err(MigrationError::Connect)?;
        let mut conn = PgConnection::connect_with(&options)
            .await
            .map_err(MigrationError::Connect)?;

        TENANT_MIGRATIONS.run_direct(&mut conn).await?;
        conn.close().await.map_err(MigrationError::Connect)?;

        info!(
            db_name = %target.name,
            version = latest_version().unwrap_or_default(),
            "tenant migrations applied"
        );
        Ok(())
    }
}

#[async_trait]
impl SchemaMigrator for SqlxMigrator {
    async fn migrate(&self, target: &DatabaseConfig) -> Result<(), MigrationError> {
        tokio::time::timeout(self.timeout, self.run(target))
            .await
            .map_err(|_| MigrationError::Timeout(self.timeout))?
    }
}
