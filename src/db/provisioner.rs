use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{Connection, Executor};
use tracing::{info, warn};

use crate::db::quote_ident;
use crate::error::ProvisionError;

/// SQLSTATE raised by `CREATE DATABASE` when the name is taken.
const DUPLICATE_DATABASE: &str = "42P04";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateStatus {
    Created,
    /// The database was already there, e.g. a redelivered tenant event.
    AlreadyExists,
}

/// Creates and drops physical databases on the database server.
#[async_trait]
pub trait DatabaseProvisioner: Send + Sync {
    async fn create_database(&self, db_name: &str) -> Result<CreateStatus, ProvisionError>;
    async fn drop_database(&self, db_name: &str) -> Result<(), ProvisionError>;
    async fn database_exists(&self, db_name: &str) -> Result<bool, ProvisionError>;
}

/// Provisioner backed by a fixed administrative PostgreSQL identity.
pub struct PgProvisioner {
    admin: PgConnectOptions,
    timeout: Duration,
}

impl PgProvisioner {
    pub fn new(admin: PgConnectOptions, timeout: Duration) -> Self {
        Self { admin, timeout }
    }

    /// Each operation gets its own connection. No transaction is opened on
    /// it, so statements run in autocommit mode.
    async fn connect(&self) -> Result<PgConnection, ProvisionError> {
        Ok(PgConnection::connect_with(&self.admin).await?)
    }

    async fn exists_on(conn: &mut PgConnection, db_name: &str) -> Result<bool, ProvisionError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
                .bind(db_name)
                .fetch_one(&mut *conn)
                .await?;
        Ok(exists)
    }

    /// Sets `issued` right before `CREATE DATABASE` goes out. Errors raised
    /// earlier come back as [`ProvisionError::NotIssued`].
    async fn create(&self, db_name: &str, issued: &AtomicBool) -> Result<CreateStatus, ProvisionError> {
        let mut conn = self.connect().await.map_err(ProvisionError::not_issued)?;

        let exists = Self::exists_on(&mut conn, db_name)
            .await
            .map_err(ProvisionError::not_issued)?;
        if exists {
            info!(db_name, "database already exists, skipping CREATE DATABASE");
            conn.close().await.map_err(|e| ProvisionError::from(e).not_issued())?;
            return Ok(CreateStatus::AlreadyExists);
        }

        issued.store(true, Ordering::SeqCst);
        let result = (&mut conn)
            .execute(sqlx::raw_sql(&format!("CREATE DATABASE {}", quote_ident(db_name))))
            .await;

        let status = match result {
            Ok(_) => CreateStatus::Created,
            // Lost a race against another attempt for the same name.
            Err(sqlx::Error::Database(e)) if e.code().as_deref() == Some(DUPLICATE_DATABASE) => {
                warn!(db_name, "database was created concurrently");
                CreateStatus::AlreadyExists
            }
            Err(e) => return Err(e.into()),
        };

        conn.close().await?;
        if status == CreateStatus::Created {
            info!(db_name, "created database");
        }
        Ok(status)
    }

    async fn remove(&self, db_name: &str) -> Result<(), ProvisionError> {
        let mut conn = self.connect().await?;
        (&mut conn)
            .execute(sqlx::raw_sql(&format!("DROP DATABASE IF EXISTS {}", quote_ident(db_name))))
            .await?;
        conn.close().await?;
        info!(db_name, "dropped database");
        Ok(())
    }

    async fn exists(&self, db_name: &str) -> Result<bool, ProvisionError> {
        let mut conn = self.connect().await?;
        let exists = Self::exists_on(&mut conn, db_name).await?;
        conn.close().await?;
        Ok(exists)
    }
}

#[async_trait]
impl DatabaseProvisioner for PgProvisioner {
    async fn create_database(&self, db_name: &str) -> Result<CreateStatus, ProvisionError> {
        let issued = AtomicBool::new(false);
        match tokio::time::timeout(self.timeout, self.create(db_name, &issued)).await {
            Ok(result) => result,
            Err(_) if issued.load(Ordering::SeqCst) => Err(ProvisionError::Timeout(self.timeout)),
            Err(_) => Err(ProvisionError::Timeout(self.timeout).not_issued()),
        }
    }

    async fn drop_database(&self, db_name: &str) -> Result<(), ProvisionError> {
        tokio::time::timeout(self.timeout, self.remove(db_name))
            .await
            .map_err(|_| ProvisionError::Timeout(self.timeout))?
    }

    async fn database_exists(&self, db_name: &str) -> Result<bool, ProvisionError> {
        tokio::time::timeout(self.timeout, self.exists(db_name))
            .await
            .map_err(|_| ProvisionError::Timeout(self.timeout))?
    }
}
