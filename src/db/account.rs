use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgConnection;
use sqlx::Connection;
use tracing::info;

use crate::error::AccountError;
use crate::models::database_config::DatabaseConfig;
use crate::models::outcome::AccountStatus;
use crate::models::tenant::ClientSpec;

/// Row written for a tenant's administrative login.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub is_superuser: bool,
    pub is_staff: bool,
}

impl NewAccount {
    /// Full administrator with a bcrypt-hashed password.
    pub fn administrator(client: &ClientSpec, bcrypt_cost: u32) -> Result<Self, AccountError> {
        Ok(Self {
            username: client.username.clone(),
            email: client.email.clone(),
            password_hash: bcrypt::hash(&client.password, bcrypt_cost)?,
            is_superuser: true,
            is_staff: true,
        })
    }
}

/// Creates a tenant's administrative account inside the tenant database.
#[async_trait]
pub trait AccountInitializer: Send + Sync {
    /// No-op when an account with the client's username already exists.
    async fn ensure_account(
        &self,
        target: &DatabaseConfig,
        client: &ClientSpec,
    ) -> Result<AccountStatus, AccountError>;
}

pub struct PgAccountInitializer {
    bcrypt_cost: u32,
    timeout: Duration,
}

impl PgAccountInitializer {
    pub fn new(bcrypt_cost: u32, timeout: Duration) -> Self {
        Self {
            bcrypt_cost,
            timeout,
        }
    }

    async fn ensure(
        &self,
        target: &DatabaseConfig,
        client: &ClientSpec,
    ) -> Result<AccountStatus, AccountError> {
        let options = target.connect_options()?;
        let mut conn = PgConnection::connect_with(&options).await?;

        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM auth_user WHERE username = $1)")
                .bind(&client.username)
                .fetch_one(&mut conn)
                .await?;
        if exists {
            conn.close().await?;
            info!(db_name = %target.name, username = %client.username, "superuser already exists");
            return Ok(AccountStatus::AlreadyExists);
        }

        let account = NewAccount::administrator(client, self.bcrypt_cost)?;
        let inserted = insert_account(&mut conn, &account).await?;
        conn.close().await?;

        if inserted == 0 {
            info!(db_name = %target.name, username = %client.username, "superuser created concurrently");
            return Ok(AccountStatus::AlreadyExists);
        }

        info!(db_name = %target.name, username = %client.username, "superuser created");
        Ok(AccountStatus::Created)
    }
}

/// Inserts the account unless the username is taken. Returns rows written.
async fn insert_account(conn: &mut PgConnection, account: &NewAccount) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "INSERT INTO auth_user (username, email, password, is_superuser, is_staff, is_active)
         VALUES ($1, $2, $3, $4, $5, TRUE)
         ON CONFLICT (username) DO NOTHING",
    )
    .bind(&account.username)
    .bind(&account.email)
    .bind(&account.password_hash)
    .bind(account.is_superuser)
    .bind(account.is_staff)
    .execute(conn)
    .await?;
    Ok(result.rows_affected())
}

#[async_trait]
impl AccountInitializer for PgAccountInitializer {
    async fn ensure_account(
        &self,
        target: &DatabaseConfig,
        client: &ClientSpec,
    ) -> Result<AccountStatus, AccountError> {
        tokio::time::timeout(self.timeout, self.ensure(target, client))
            .await
            .map_err(|_| AccountError::Timeout(self.timeout))?
    }
}
